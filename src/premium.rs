use std::collections::HashMap;

use crate::error::EngineError;
use crate::ledger::ProviderLedger;
use crate::tiers::TierName;
use crate::types::{BPS_DENOM, ProviderId, mul_div};

/// Outcome of one distribution round. The engine applies `shares` to the
/// ledger's yield balances; `carry` stays here for the next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub tier: TierName,
    pub amount: u64,
    pub platform_fee: u64,
    pub shares: Vec<(ProviderId, u64)>,
    pub carry: u64,
}

impl Distribution {
    pub fn credited(&self) -> u64 {
        self.shares.iter().map(|(_, s)| s).sum()
    }
}

/// Splits premiums platform/providers and distributes the provider portion
/// pro-rata by deposited capital at distribution time. Integer floor
/// division leaves a residual every round; it accumulates in a per-tier
/// carry pool and rides into the next round instead of leaking.
#[derive(Debug)]
pub struct PremiumSettlement {
    platform_fee_bps: u64,
    carry: HashMap<TierName, u64>,
    platform_accrued: u64,
}

impl PremiumSettlement {
    pub fn new(platform_fee_bps: u64) -> Self {
        PremiumSettlement {
            platform_fee_bps,
            carry: HashMap::new(),
            platform_accrued: 0,
        }
    }

    pub fn carry(&self, tier: TierName) -> u64 {
        self.carry.get(&tier).copied().unwrap_or(0)
    }

    pub fn platform_accrued(&self) -> u64 {
        self.platform_accrued
    }

    /// Compute one round. Pure with respect to the ledger; the caller
    /// credits the shares. Weights are `deposited` at this moment, so a
    /// provider who joined after the premium was collected still dilutes
    /// the split, as intended for pooled counterparty risk.
    pub fn distribute(
        &mut self,
        tier: TierName,
        amount: u64,
        ledger: &ProviderLedger,
    ) -> Result<Distribution, EngineError> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let platform_fee = mul_div(amount, self.platform_fee_bps, BPS_DENOM);
        let pool = amount - platform_fee + self.carry(tier);

        let mut positions: Vec<(ProviderId, u64)> = ledger
            .positions_in_tier(tier)
            .filter(|p| p.deposited > 0 && !ledger.is_halted(p.provider_id))
            .map(|p| (p.provider_id, p.deposited))
            .collect();
        positions.sort_unstable_by_key(|(id, _)| *id);
        let tier_total: u64 = positions.iter().map(|(_, d)| d).sum();

        let shares: Vec<(ProviderId, u64)> = if tier_total == 0 {
            // Nobody to credit; the whole pool carries forward.
            Vec::new()
        } else {
            positions
                .into_iter()
                .map(|(id, deposited)| (id, mul_div(pool, deposited, tier_total)))
                .collect()
        };

        let credited: u64 = shares.iter().map(|(_, s)| s).sum();
        let carry = pool - credited;
        self.carry.insert(tier, carry);
        self.platform_accrued += platform_fee;

        Ok(Distribution { tier, amount, platform_fee, shares, carry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    const T0: Timestamp = Timestamp(0);

    fn ledger_three_providers() -> ProviderLedger {
        let mut l = ProviderLedger::new();
        l.deposit(ProviderId(1), TierName::Balanced, 5_000, T0).unwrap();
        l.deposit(ProviderId(2), TierName::Balanced, 3_000, T0).unwrap();
        l.deposit(ProviderId(3), TierName::Balanced, 2_000, T0).unwrap();
        l
    }

    #[test]
    fn split_is_proportional_to_deposits() {
        let ledger = ledger_three_providers();
        let mut ps = PremiumSettlement::new(0);
        let d = ps.distribute(TierName::Balanced, 10_000, &ledger).unwrap();
        assert_eq!(
            d.shares,
            vec![(ProviderId(1), 5_000), (ProviderId(2), 3_000), (ProviderId(3), 2_000)]
        );
        assert_eq!(d.carry, 0);
    }

    #[test]
    fn platform_fee_taken_off_the_top() {
        let ledger = ledger_three_providers();
        let mut ps = PremiumSettlement::new(500); // 5%
        let d = ps.distribute(TierName::Balanced, 10_000, &ledger).unwrap();
        assert_eq!(d.platform_fee, 500);
        assert_eq!(d.credited(), 9_500);
        assert_eq!(ps.platform_accrued(), 500);
    }

    #[test]
    fn conservation_holds_exactly_each_round() {
        let ledger = ledger_three_providers();
        let mut ps = PremiumSettlement::new(500);
        let carry_in = ps.carry(TierName::Balanced);
        let d = ps.distribute(TierName::Balanced, 9_973, &ledger).unwrap();
        assert_eq!(
            d.platform_fee + d.credited() + d.carry,
            d.amount + carry_in,
            "value must not leak through rounding"
        );
    }

    #[test]
    fn residual_carries_into_next_round() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(ProviderId(1), TierName::Balanced, 3, T0).unwrap();
        ledger.deposit(ProviderId(2), TierName::Balanced, 3, T0).unwrap();
        ledger.deposit(ProviderId(3), TierName::Balanced, 3, T0).unwrap();
        let mut ps = PremiumSettlement::new(0);

        // 10 over equal thirds: each gets 3, residual 1 carries.
        let d1 = ps.distribute(TierName::Balanced, 10, &ledger).unwrap();
        assert_eq!(d1.carry, 1);

        // Next round distributes 10 + 1 carried: 11/3 ⇒ 3 each, carry 2.
        let d2 = ps.distribute(TierName::Balanced, 10, &ledger).unwrap();
        assert_eq!(d2.carry, 2);
        assert_eq!(d2.credited(), 9);
    }

    #[test]
    fn empty_tier_carries_everything() {
        let ledger = ProviderLedger::new();
        let mut ps = PremiumSettlement::new(500);
        let d = ps.distribute(TierName::Aggressive, 1_000, &ledger).unwrap();
        assert!(d.shares.is_empty());
        assert_eq!(d.platform_fee, 50);
        assert_eq!(d.carry, 950);
        // A later depositor inherits the carried pool.
        let mut ledger = ProviderLedger::new();
        ledger.deposit(ProviderId(9), TierName::Aggressive, 100, T0).unwrap();
        let d2 = ps.distribute(TierName::Aggressive, 1_000, &ledger).unwrap();
        assert_eq!(d2.credited(), 950 + 950);
        assert_eq!(d2.carry, 0);
    }

    #[test]
    fn zero_amount_rejected() {
        let ledger = ledger_three_providers();
        let mut ps = PremiumSettlement::new(500);
        assert_eq!(
            ps.distribute(TierName::Balanced, 0, &ledger).unwrap_err(),
            EngineError::ZeroAmount
        );
    }

    #[test]
    fn weights_are_read_at_distribution_time() {
        let mut ledger = ledger_three_providers();
        let mut ps = PremiumSettlement::new(0);
        // A late depositor doubles the tier before distribution fires.
        ledger.deposit(ProviderId(4), TierName::Balanced, 10_000, T0).unwrap();
        let d = ps.distribute(TierName::Balanced, 10_000, &ledger).unwrap();
        let late = d.shares.iter().find(|(id, _)| *id == ProviderId(4)).unwrap();
        assert_eq!(late.1, 5_000, "late depositor dilutes the split");
    }
}
