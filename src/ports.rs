use std::cell::{Cell, RefCell};

use crate::error::EngineError;
use crate::obligations::PolicyType;
use crate::tiers::RiskTier;
use crate::types::{AccountId, ObligationId, ProviderId, Timestamp};

/// A price answer: cents per BTC and when it was observed. Staleness policy
/// belongs to the engine, not the source; the source just reports honestly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: u64,
    pub as_of: Timestamp,
}

/// External price feed. The engine treats it as untrusted except for
/// freshness: an `Err` or an old `as_of` flips the engine into safe mode.
pub trait PriceSource {
    fn get_price(&self) -> Result<PriceQuote, EngineError>;
    fn get_volatility(&self, window_secs: u64) -> Result<f64, EngineError>;
}

/// External premium pricing. The engine never computes premiums itself;
/// it forwards the tier so the calculator can apply the tier multiplier.
pub trait PremiumCalculator {
    fn quote(
        &self,
        tier: &RiskTier,
        protected_value: u64,
        protected_amount: u64,
        duration_secs: u64,
        policy_type: PolicyType,
    ) -> Result<u64, EngineError>;
}

/// The policy registry owns obligation identity and buyer-facing lifecycle;
/// the engine only reports collateral-relevant transitions back to it.
pub trait PolicyRegistry {
    #[allow(clippy::too_many_arguments)]
    fn create_obligation(
        &self,
        owner: AccountId,
        policy_type: PolicyType,
        protected_value: u64,
        protected_amount: u64,
        premium: u64,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<ObligationId, EngineError>;
    fn mark_transferred(&self, id: ObligationId) -> Result<(), EngineError>;
    fn mark_exercised(&self, id: ObligationId) -> Result<(), EngineError>;
    fn mark_expired(&self, id: ObligationId) -> Result<(), EngineError>;
    fn mark_canceled(&self, id: ObligationId) -> Result<(), EngineError>;
}

/// Backstop capital. Must be consulted *before* the engine commits a
/// liquidation; a refusal aborts the pass.
pub trait InsuranceFund {
    fn receive_transferred_obligations(
        &self,
        provider: ProviderId,
        obligations: &[ObligationId],
    ) -> Result<(), EngineError>;
}

// Shared handles delegate, so a caller can keep a `Rc` to a double it hands
// to the engine and steer it mid-test.
impl<T: PriceSource + ?Sized> PriceSource for std::rc::Rc<T> {
    fn get_price(&self) -> Result<PriceQuote, EngineError> {
        (**self).get_price()
    }

    fn get_volatility(&self, window_secs: u64) -> Result<f64, EngineError> {
        (**self).get_volatility(window_secs)
    }
}

impl<T: PremiumCalculator + ?Sized> PremiumCalculator for std::rc::Rc<T> {
    fn quote(
        &self,
        tier: &RiskTier,
        protected_value: u64,
        protected_amount: u64,
        duration_secs: u64,
        policy_type: PolicyType,
    ) -> Result<u64, EngineError> {
        (**self).quote(tier, protected_value, protected_amount, duration_secs, policy_type)
    }
}

impl<T: PolicyRegistry + ?Sized> PolicyRegistry for std::rc::Rc<T> {
    fn create_obligation(
        &self,
        owner: AccountId,
        policy_type: PolicyType,
        protected_value: u64,
        protected_amount: u64,
        premium: u64,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<ObligationId, EngineError> {
        (**self).create_obligation(
            owner,
            policy_type,
            protected_value,
            protected_amount,
            premium,
            created_at,
            expires_at,
        )
    }

    fn mark_transferred(&self, id: ObligationId) -> Result<(), EngineError> {
        (**self).mark_transferred(id)
    }

    fn mark_exercised(&self, id: ObligationId) -> Result<(), EngineError> {
        (**self).mark_exercised(id)
    }

    fn mark_expired(&self, id: ObligationId) -> Result<(), EngineError> {
        (**self).mark_expired(id)
    }

    fn mark_canceled(&self, id: ObligationId) -> Result<(), EngineError> {
        (**self).mark_canceled(id)
    }
}

impl<T: InsuranceFund + ?Sized> InsuranceFund for std::rc::Rc<T> {
    fn receive_transferred_obligations(
        &self,
        provider: ProviderId,
        obligations: &[ObligationId],
    ) -> Result<(), EngineError> {
        (**self).receive_transferred_obligations(provider, obligations)
    }
}

// ── Deterministic in-memory implementations ─────────────────────────────────
// Used by unit tests, the stress harness, and benches. Interior mutability
// keeps the trait methods `&self` as real adapters would be.

/// Price source with a settable quote and an availability switch.
#[derive(Debug)]
pub struct StubPriceSource {
    quote: Cell<PriceQuote>,
    available: Cell<bool>,
    volatility: Cell<f64>,
}

impl StubPriceSource {
    pub fn new(price: u64, as_of: Timestamp) -> Self {
        StubPriceSource {
            quote: Cell::new(PriceQuote { price, as_of }),
            available: Cell::new(true),
            volatility: Cell::new(0.45),
        }
    }

    pub fn set_price(&self, price: u64, as_of: Timestamp) {
        self.quote.set(PriceQuote { price, as_of });
    }

    pub fn set_available(&self, up: bool) {
        self.available.set(up);
    }

    pub fn set_volatility(&self, v: f64) {
        self.volatility.set(v);
    }
}

impl PriceSource for StubPriceSource {
    fn get_price(&self) -> Result<PriceQuote, EngineError> {
        if !self.available.get() {
            return Err(EngineError::PriceUnavailable);
        }
        Ok(self.quote.get())
    }

    fn get_volatility(&self, _window_secs: u64) -> Result<f64, EngineError> {
        if !self.available.get() {
            return Err(EngineError::PriceUnavailable);
        }
        Ok(self.volatility.get())
    }
}

/// Flat-rate calculator: `amount × rate_bps × tier multiplier`, scaled by
/// duration in whole days. Close enough to exercise the settlement path.
#[derive(Debug)]
pub struct FlatPremiumCalculator {
    pub rate_bps: u64,
}

impl PremiumCalculator for FlatPremiumCalculator {
    fn quote(
        &self,
        tier: &RiskTier,
        _protected_value: u64,
        protected_amount: u64,
        duration_secs: u64,
        _policy_type: PolicyType,
    ) -> Result<u64, EngineError> {
        let days = (duration_secs / Timestamp::SECS_PER_DAY).max(1);
        let base = crate::types::mul_div(protected_amount, self.rate_bps, crate::types::BPS_DENOM);
        let scaled = crate::types::mul_div(base, tier.premium_multiplier_bps, crate::types::BPS_DENOM);
        Ok(scaled.saturating_mul(days) / 30)
    }
}

/// Registry double: hands out sequential ids and records every mark call.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    next_id: Cell<u64>,
    pub transferred: RefCell<Vec<ObligationId>>,
    pub exercised: RefCell<Vec<ObligationId>>,
    pub expired: RefCell<Vec<ObligationId>>,
    pub canceled: RefCell<Vec<ObligationId>>,
    fail_creates: Cell<bool>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_obligation` fail, for atomicity tests.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.set(fail);
    }
}

impl PolicyRegistry for RecordingRegistry {
    fn create_obligation(
        &self,
        _owner: AccountId,
        _policy_type: PolicyType,
        _protected_value: u64,
        _protected_amount: u64,
        _premium: u64,
        _created_at: Timestamp,
        _expires_at: Timestamp,
    ) -> Result<ObligationId, EngineError> {
        if self.fail_creates.get() {
            return Err(EngineError::RegistryFailure("create refused".into()));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Ok(ObligationId(id))
    }

    fn mark_transferred(&self, id: ObligationId) -> Result<(), EngineError> {
        self.transferred.borrow_mut().push(id);
        Ok(())
    }

    fn mark_exercised(&self, id: ObligationId) -> Result<(), EngineError> {
        self.exercised.borrow_mut().push(id);
        Ok(())
    }

    fn mark_expired(&self, id: ObligationId) -> Result<(), EngineError> {
        self.expired.borrow_mut().push(id);
        Ok(())
    }

    fn mark_canceled(&self, id: ObligationId) -> Result<(), EngineError> {
        self.canceled.borrow_mut().push(id);
        Ok(())
    }
}

/// Fund double: records transfers, optionally refuses them.
#[derive(Debug, Default)]
pub struct RecordingFund {
    pub received: RefCell<Vec<(ProviderId, Vec<ObligationId>)>>,
    refuse: Cell<bool>,
}

impl RecordingFund {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.set(refuse);
    }
}

impl InsuranceFund for RecordingFund {
    fn receive_transferred_obligations(
        &self,
        provider: ProviderId,
        obligations: &[ObligationId],
    ) -> Result<(), EngineError> {
        if self.refuse.get() {
            return Err(EngineError::FundFailure("fund at capacity".into()));
        }
        self.received
            .borrow_mut()
            .push((provider, obligations.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::canonical_tiers;
    use crate::tiers::TierName;

    #[test]
    fn stub_price_source_reports_unavailability() {
        let src = StubPriceSource::new(5_000_000, Timestamp(0));
        assert!(src.get_price().is_ok());
        src.set_available(false);
        assert_eq!(src.get_price().unwrap_err(), EngineError::PriceUnavailable);
    }

    #[test]
    fn flat_calculator_applies_tier_multiplier() {
        let tiers = canonical_tiers();
        let conservative = tiers.iter().find(|t| t.name == TierName::Conservative).unwrap();
        let aggressive = tiers.iter().find(|t| t.name == TierName::Aggressive).unwrap();
        let calc = FlatPremiumCalculator { rate_bps: 200 };
        let cheap = calc
            .quote(conservative, 4_000_000, 1_000_000, Timestamp::days(30), PolicyType::Put)
            .unwrap();
        let dear = calc
            .quote(aggressive, 4_000_000, 1_000_000, Timestamp::days(30), PolicyType::Put)
            .unwrap();
        assert!(dear > cheap, "aggressive tier must price higher: {dear} vs {cheap}");
    }

    #[test]
    fn recording_registry_issues_sequential_ids() {
        let reg = RecordingRegistry::new();
        let a = reg
            .create_obligation(
                AccountId(1),
                PolicyType::Put,
                4_500_000,
                100,
                10,
                Timestamp(0),
                Timestamp(100),
            )
            .unwrap();
        let b = reg
            .create_obligation(
                AccountId(1),
                PolicyType::Put,
                4_500_000,
                100,
                10,
                Timestamp(0),
                Timestamp(100),
            )
            .unwrap();
        assert_eq!((a, b), (ObligationId(0), ObligationId(1)));
    }

    #[test]
    fn refusing_fund_returns_failure() {
        let fund = RecordingFund::new();
        fund.refuse(true);
        let err = fund
            .receive_transferred_obligations(ProviderId(1), &[ObligationId(0)])
            .unwrap_err();
        assert!(matches!(err, EngineError::FundFailure(_)));
        assert!(fund.received.borrow().is_empty());
    }
}
