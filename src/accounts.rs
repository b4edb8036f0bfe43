use std::collections::HashMap;

use serde::Serialize;

use crate::error::EngineError;
use crate::ledger::ProviderLedger;
use crate::tiers::TierName;
use crate::types::BPS_DENOM;

/// Materialized per-tier aggregate over the provider ledger. Maintained
/// incrementally on every mutation and reconciled against a fresh sum before
/// the mutation is considered settled; divergence halts the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierAccount {
    pub tier: TierName,
    pub total: u64,
    pub locked: u64,
    pub active_obligation_count: u64,
}

impl TierAccount {
    fn empty(tier: TierName) -> Self {
        TierAccount { tier, total: 0, locked: 0, active_obligation_count: 0 }
    }

    pub fn available(&self) -> u64 {
        self.total - self.locked
    }

    pub fn utilization_bps(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.locked as u128 * BPS_DENOM as u128 / self.total as u128) as u64
        }
    }
}

#[derive(Debug, Default)]
pub struct TierAccounts {
    accounts: HashMap<TierName, TierAccount>,
}

impl TierAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tier: TierName) -> TierAccount {
        self.accounts
            .get(&tier)
            .copied()
            .unwrap_or_else(|| TierAccount::empty(tier))
    }

    fn entry(&mut self, tier: TierName) -> &mut TierAccount {
        self.accounts
            .entry(tier)
            .or_insert_with(|| TierAccount::empty(tier))
    }

    pub fn on_deposit(&mut self, tier: TierName, amount: u64) {
        self.entry(tier).total += amount;
    }

    pub fn on_withdraw(&mut self, tier: TierName, amount: u64) {
        self.entry(tier).total -= amount;
    }

    pub fn on_lock(&mut self, tier: TierName, amount: u64) {
        self.entry(tier).locked += amount;
    }

    pub fn on_unlock(&mut self, tier: TierName, amount: u64) {
        self.entry(tier).locked -= amount;
    }

    /// Seizure removes value from the pool: total and locked fall together.
    pub fn on_seize(&mut self, tier: TierName, amount: u64) {
        let acct = self.entry(tier);
        acct.total -= amount;
        acct.locked -= amount;
    }

    pub fn on_migrate(&mut self, from: TierName, to: TierName, deposited: u64, locked: u64) {
        {
            let src = self.entry(from);
            src.total -= deposited;
            src.locked -= locked;
        }
        let dst = self.entry(to);
        dst.total += deposited;
        dst.locked += locked;
    }

    pub fn on_obligation_opened(&mut self, tier: TierName) {
        self.entry(tier).active_obligation_count += 1;
    }

    pub fn on_obligation_closed(&mut self, tier: TierName) {
        let acct = self.entry(tier);
        acct.active_obligation_count = acct.active_obligation_count.saturating_sub(1);
    }

    /// Verify the cached aggregate equals a fresh sum over the ledger.
    /// Called after every mutation settles; a mismatch is fatal for the tier.
    pub fn reconcile(&self, tier: TierName, ledger: &ProviderLedger) -> Result<(), EngineError> {
        let acct = self.get(tier);
        let (mut total, mut locked) = (0u64, 0u64);
        for pos in ledger.positions_in_tier(tier) {
            total += pos.deposited;
            locked += pos.locked;
        }
        if acct.total != total {
            return Err(EngineError::TierAccountDiverged { tier, account: acct.total, ledger: total });
        }
        if acct.locked != locked {
            return Err(EngineError::TierAccountDiverged { tier, account: acct.locked, ledger: locked });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderId, Timestamp};

    const T0: Timestamp = Timestamp(0);

    #[test]
    fn utilization_is_locked_over_total() {
        let mut a = TierAccounts::new();
        a.on_deposit(TierName::Balanced, 3_000);
        a.on_lock(TierName::Balanced, 258);
        // 258/3000 = 8.6% = 860 bps.
        assert_eq!(a.get(TierName::Balanced).utilization_bps(), 860);
    }

    #[test]
    fn utilization_of_empty_tier_is_zero() {
        let a = TierAccounts::new();
        assert_eq!(a.get(TierName::Conservative).utilization_bps(), 0);
    }

    #[test]
    fn seize_shrinks_total_and_locked() {
        let mut a = TierAccounts::new();
        a.on_deposit(TierName::Balanced, 1_000);
        a.on_lock(TierName::Balanced, 800);
        a.on_seize(TierName::Balanced, 400);
        let acct = a.get(TierName::Balanced);
        assert_eq!((acct.total, acct.locked), (600, 400));
    }

    #[test]
    fn migrate_shifts_aggregates_between_tiers() {
        let mut a = TierAccounts::new();
        a.on_deposit(TierName::Aggressive, 2_000);
        a.on_lock(TierName::Aggressive, 1_500);
        a.on_migrate(TierName::Aggressive, TierName::Balanced, 2_000, 1_500);
        assert_eq!(a.get(TierName::Aggressive).total, 0);
        let dst = a.get(TierName::Balanced);
        assert_eq!((dst.total, dst.locked), (2_000, 1_500));
    }

    #[test]
    fn reconcile_passes_when_in_sync() {
        let mut ledger = ProviderLedger::new();
        let mut a = TierAccounts::new();
        ledger.deposit(ProviderId(1), TierName::Balanced, 1_000, T0).unwrap();
        a.on_deposit(TierName::Balanced, 1_000);
        ledger.lock(ProviderId(1), TierName::Balanced, 400, T0).unwrap();
        a.on_lock(TierName::Balanced, 400);
        assert!(a.reconcile(TierName::Balanced, &ledger).is_ok());
    }

    #[test]
    fn reconcile_catches_divergence() {
        let mut ledger = ProviderLedger::new();
        let mut a = TierAccounts::new();
        ledger.deposit(ProviderId(1), TierName::Balanced, 1_000, T0).unwrap();
        a.on_deposit(TierName::Balanced, 999); // drift
        let err = a.reconcile(TierName::Balanced, &ledger).unwrap_err();
        assert!(matches!(err, EngineError::TierAccountDiverged { .. }));
    }

    #[test]
    fn obligation_count_never_underflows() {
        let mut a = TierAccounts::new();
        a.on_obligation_closed(TierName::Balanced);
        assert_eq!(a.get(TierName::Balanced).active_obligation_count, 0);
    }
}
