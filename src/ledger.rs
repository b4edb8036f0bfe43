use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::EngineError;
use crate::tiers::TierName;
use crate::types::{ProviderId, Timestamp};

/// One provider's balances inside one tier. All amounts are sats.
/// `locked ≤ deposited` holds at every observable state; positions are
/// created on first deposit and only ever zeroed, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderPosition {
    pub provider_id: ProviderId,
    pub tier: TierName,
    pub deposited: u64,
    pub locked: u64,
    pub yield_accrued: u64,
    pub last_update: Timestamp,
}

impl ProviderPosition {
    pub fn available(&self) -> u64 {
        self.deposited - self.locked
    }
}

/// Per-provider-per-tier balance book. Owns no policy decisions: callers
/// decide *whether* to move capital; the ledger guarantees the arithmetic
/// stays sound and refuses to touch halted providers or tiers.
#[derive(Debug, Default)]
pub struct ProviderLedger {
    positions: HashMap<(ProviderId, TierName), ProviderPosition>,
    halted_providers: HashSet<ProviderId>,
    halted_tiers: HashSet<TierName>,
}

impl ProviderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, provider: ProviderId, tier: TierName) -> Option<&ProviderPosition> {
        self.positions.get(&(provider, tier))
    }

    pub fn positions_in_tier(&self, tier: TierName) -> impl Iterator<Item = &ProviderPosition> {
        self.positions.values().filter(move |p| p.tier == tier)
    }

    pub fn positions_of(&self, provider: ProviderId) -> impl Iterator<Item = &ProviderPosition> {
        self.positions
            .values()
            .filter(move |p| p.provider_id == provider)
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> =
            self.positions.keys().map(|(p, _)| *p).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn guard(&self, provider: ProviderId, tier: TierName) -> Result<(), EngineError> {
        if self.halted_providers.contains(&provider) {
            return Err(EngineError::ProviderHalted(provider));
        }
        if self.halted_tiers.contains(&tier) {
            return Err(EngineError::TierHalted(tier));
        }
        Ok(())
    }

    /// Credit a deposit, creating the position on first contact.
    pub fn deposit(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .entry((provider, tier))
            .or_insert(ProviderPosition {
                provider_id: provider,
                tier,
                deposited: 0,
                locked: 0,
                yield_accrued: 0,
                last_update: now,
            });
        pos.deposited += amount;
        pos.last_update = now;
        Ok(())
    }

    /// Debit free (unlocked) balance. Health and margin-call checks are the
    /// engine's job before calling this.
    pub fn withdraw(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .get_mut(&(provider, tier))
            .ok_or(EngineError::UnknownProvider(provider))?;
        if amount > pos.available() {
            return Err(EngineError::InsufficientBalance {
                requested: amount,
                available: pos.available(),
            });
        }
        pos.deposited -= amount;
        pos.last_update = now;
        Ok(())
    }

    /// Reserve free balance against an obligation.
    pub fn lock(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .get_mut(&(provider, tier))
            .ok_or(EngineError::UnknownProvider(provider))?;
        if pos.locked + amount > pos.deposited {
            return Err(EngineError::LockedExceedsDeposited {
                provider,
                locked: pos.locked + amount,
                deposited: pos.deposited,
            });
        }
        pos.locked += amount;
        pos.last_update = now;
        Ok(())
    }

    /// Release reserved balance back to free (obligation expired/canceled).
    pub fn unlock(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .get_mut(&(provider, tier))
            .ok_or(EngineError::UnknownProvider(provider))?;
        if amount > pos.locked {
            return Err(EngineError::LockedExceedsDeposited {
                provider,
                locked: pos.locked,
                deposited: amount,
            });
        }
        pos.locked -= amount;
        pos.last_update = now;
        Ok(())
    }

    /// Remove reserved balance from the pool entirely (exercise payout or
    /// liquidation seizure): deposited and locked fall together.
    pub fn seize(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .get_mut(&(provider, tier))
            .ok_or(EngineError::UnknownProvider(provider))?;
        if amount > pos.locked {
            return Err(EngineError::LockedExceedsDeposited {
                provider,
                locked: pos.locked,
                deposited: amount,
            });
        }
        pos.locked -= amount;
        pos.deposited -= amount;
        pos.last_update = now;
        Ok(())
    }

    pub fn credit_yield(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.guard(provider, tier)?;
        let pos = self
            .positions
            .get_mut(&(provider, tier))
            .ok_or(EngineError::UnknownProvider(provider))?;
        pos.yield_accrued += amount;
        pos.last_update = now;
        Ok(())
    }

    /// Move a provider's entire position from one tier to another (margin
    /// call resolution by migration). Returns `(deposited, locked)` moved so
    /// the tier accounts can follow.
    pub fn migrate(
        &mut self,
        provider: ProviderId,
        from: TierName,
        to: TierName,
        now: Timestamp,
    ) -> Result<(u64, u64), EngineError> {
        self.guard(provider, from)?;
        self.guard(provider, to)?;
        let src = self
            .positions
            .get_mut(&(provider, from))
            .ok_or(EngineError::UnknownProvider(provider))?;
        let (dep, locked, yld) = (src.deposited, src.locked, src.yield_accrued);
        src.deposited = 0;
        src.locked = 0;
        src.yield_accrued = 0;
        src.last_update = now;

        let dst = self
            .positions
            .entry((provider, to))
            .or_insert(ProviderPosition {
                provider_id: provider,
                tier: to,
                deposited: 0,
                locked: 0,
                yield_accrued: 0,
                last_update: now,
            });
        dst.deposited += dep;
        dst.locked += locked;
        dst.yield_accrued += yld;
        dst.last_update = now;
        Ok((dep, locked))
    }

    // ── Halt management ──────────────────────────────────────────────────────

    pub fn halt_provider(&mut self, provider: ProviderId) {
        self.halted_providers.insert(provider);
    }

    pub fn halt_tier(&mut self, tier: TierName) {
        self.halted_tiers.insert(tier);
    }

    /// Governance-only: lift a halt after manual review.
    pub fn clear_halts(&mut self, provider: ProviderId) {
        self.halted_providers.remove(&provider);
    }

    pub fn is_halted(&self, provider: ProviderId) -> bool {
        self.halted_providers.contains(&provider)
    }

    /// Consistency audit over every position. Any hit is fatal for the
    /// affected provider; the caller decides whether to halt.
    pub fn audit(&self) -> Vec<EngineError> {
        self.positions
            .values()
            .filter(|p| p.locked > p.deposited)
            .map(|p| EngineError::LockedExceedsDeposited {
                provider: p.provider_id,
                locked: p.locked,
                deposited: p.deposited,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Timestamp = Timestamp(0);

    fn ledger_with(provider: u64, tier: TierName, deposited: u64) -> ProviderLedger {
        let mut l = ProviderLedger::new();
        l.deposit(ProviderId(provider), tier, deposited, T0).unwrap();
        l
    }

    // ── deposit / withdraw ────────────────────────────────────────────────────

    #[test]
    fn first_deposit_creates_position() {
        let l = ledger_with(1, TierName::Balanced, 1_000);
        let pos = l.position(ProviderId(1), TierName::Balanced).unwrap();
        assert_eq!(pos.deposited, 1_000);
        assert_eq!(pos.locked, 0);
    }

    #[test]
    fn zero_deposit_rejected() {
        let mut l = ProviderLedger::new();
        let err = l.deposit(ProviderId(1), TierName::Balanced, 0, T0).unwrap_err();
        assert_eq!(err, EngineError::ZeroAmount);
    }

    #[test]
    fn withdraw_over_available_rejected() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 800, T0).unwrap();
        let err = l
            .withdraw(ProviderId(1), TierName::Balanced, 300, T0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { available: 200, .. }));
    }

    #[test]
    fn withdraw_leaves_locked_untouched() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 600, T0).unwrap();
        l.withdraw(ProviderId(1), TierName::Balanced, 400, T0).unwrap();
        let pos = l.position(ProviderId(1), TierName::Balanced).unwrap();
        assert_eq!(pos.deposited, 600);
        assert_eq!(pos.locked, 600);
    }

    // ── lock / unlock / seize ─────────────────────────────────────────────────

    #[test]
    fn lock_beyond_deposited_rejected() {
        let mut l = ledger_with(1, TierName::Balanced, 500);
        let err = l.lock(ProviderId(1), TierName::Balanced, 501, T0).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::InvariantViolation);
        // Rejection must not partially apply.
        assert_eq!(l.position(ProviderId(1), TierName::Balanced).unwrap().locked, 0);
    }

    #[test]
    fn unlock_returns_capital_to_available() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 700, T0).unwrap();
        l.unlock(ProviderId(1), TierName::Balanced, 300, T0).unwrap();
        let pos = l.position(ProviderId(1), TierName::Balanced).unwrap();
        assert_eq!(pos.locked, 400);
        assert_eq!(pos.available(), 600);
    }

    #[test]
    fn seize_reduces_deposited_and_locked_together() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 800, T0).unwrap();
        l.seize(ProviderId(1), TierName::Balanced, 400, T0).unwrap();
        let pos = l.position(ProviderId(1), TierName::Balanced).unwrap();
        assert_eq!(pos.deposited, 600);
        assert_eq!(pos.locked, 400);
    }

    #[test]
    fn seize_beyond_locked_rejected() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 100, T0).unwrap();
        assert!(l.seize(ProviderId(1), TierName::Balanced, 101, T0).is_err());
    }

    // ── migration ─────────────────────────────────────────────────────────────

    #[test]
    fn migrate_moves_whole_position_and_zeroes_source() {
        let mut l = ledger_with(7, TierName::Aggressive, 2_000);
        l.lock(ProviderId(7), TierName::Aggressive, 1_500, T0).unwrap();
        l.credit_yield(ProviderId(7), TierName::Aggressive, 33, T0).unwrap();

        let (dep, locked) = l
            .migrate(ProviderId(7), TierName::Aggressive, TierName::Balanced, T0)
            .unwrap();
        assert_eq!((dep, locked), (2_000, 1_500));

        let src = l.position(ProviderId(7), TierName::Aggressive).unwrap();
        assert_eq!((src.deposited, src.locked, src.yield_accrued), (0, 0, 0));

        let dst = l.position(ProviderId(7), TierName::Balanced).unwrap();
        assert_eq!((dst.deposited, dst.locked, dst.yield_accrued), (2_000, 1_500, 33));
    }

    // ── halts ─────────────────────────────────────────────────────────────────

    #[test]
    fn halted_provider_rejects_all_mutations() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.halt_provider(ProviderId(1));
        assert!(matches!(
            l.deposit(ProviderId(1), TierName::Balanced, 10, T0),
            Err(EngineError::ProviderHalted(_))
        ));
        assert!(matches!(
            l.lock(ProviderId(1), TierName::Balanced, 10, T0),
            Err(EngineError::ProviderHalted(_))
        ));
        l.clear_halts(ProviderId(1));
        assert!(l.deposit(ProviderId(1), TierName::Balanced, 10, T0).is_ok());
    }

    #[test]
    fn halted_tier_rejects_mutations_for_every_provider() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.halt_tier(TierName::Balanced);
        assert!(matches!(
            l.deposit(ProviderId(2), TierName::Balanced, 10, T0),
            Err(EngineError::TierHalted(_))
        ));
    }

    #[test]
    fn audit_clean_ledger_reports_nothing() {
        let mut l = ledger_with(1, TierName::Balanced, 1_000);
        l.lock(ProviderId(1), TierName::Balanced, 1_000, T0).unwrap();
        assert!(l.audit().is_empty());
    }
}
