use serde::Serialize;

use crate::config::{LIQUIDATION_FRACTION_MAX_BPS, LIQUIDATION_FRACTION_MIN_BPS};
use crate::ledger::ProviderLedger;
use crate::obligations::ObligationBook;
use crate::tiers::TierName;
use crate::types::{BPS_DENOM, LiquidationId, ObligationId, ProviderId, Timestamp, mul_div};

/// Append-only audit record of one liquidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidationRecord {
    pub id: LiquidationId,
    pub provider_id: ProviderId,
    /// Sats seized and transferred to the insurance fund.
    pub liquidated_amount: u64,
    /// Sats still locked for this provider after the pass.
    pub remaining_amount: u64,
    /// Price (cents per BTC) the pass was executed at.
    pub liquidation_price: u64,
    pub obligations_transferred: Vec<ObligationId>,
    pub at: Timestamp,
}

/// A computed-but-not-applied liquidation. Everything the commit needs is
/// decided here so the engine can consult external collaborators between
/// planning and applying, and abort with no state touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationPlan {
    pub provider_id: ProviderId,
    pub fraction_bps: u64,
    /// Per-obligation sats moving from the provider's share to the fund.
    pub transfers: Vec<(ObligationId, u64)>,
    /// Per-tier seizure amounts against the provider's positions.
    pub seizures: Vec<(TierName, u64)>,
    pub locked_before: u64,
    pub seized_total: u64,
}

impl LiquidationPlan {
    pub fn remaining(&self) -> u64 {
        self.locked_before - self.seized_total
    }

    pub fn obligation_ids(&self) -> Vec<ObligationId> {
        self.transfers.iter().map(|(id, _)| *id).collect()
    }
}

/// Compute a partial liquidation of `fraction_bps` of every obligation share
/// the provider backs. The fraction is clamped to the governance bounds.
/// Floor division per obligation means the seized total can undershoot the
/// nominal fraction by at most one sat per obligation, never overshoot.
pub fn plan(
    provider: ProviderId,
    ledger: &ProviderLedger,
    book: &ObligationBook,
    fraction_bps: u64,
) -> LiquidationPlan {
    let fraction_bps =
        fraction_bps.clamp(LIQUIDATION_FRACTION_MIN_BPS, LIQUIDATION_FRACTION_MAX_BPS);

    let mut transfers: Vec<(ObligationId, u64)> = book
        .backed_by(provider)
        .map(|ob| (ob.id, mul_div(ob.provider_share(provider), fraction_bps, BPS_DENOM)))
        .filter(|(_, amount)| *amount > 0)
        .collect();
    transfers.sort_unstable_by_key(|(id, _)| *id);
    let seized_total: u64 = transfers.iter().map(|(_, a)| a).sum();

    // Allocate the seizure across the provider's tier positions. Locks are
    // created one-to-one with obligation shares, so the provider's locked
    // total always covers the seized total.
    let mut positions: Vec<(TierName, u64)> = ledger
        .positions_of(provider)
        .filter(|p| p.locked > 0)
        .map(|p| (p.tier, p.locked))
        .collect();
    positions.sort_unstable_by_key(|(tier, _)| *tier);
    let locked_before: u64 = positions.iter().map(|(_, l)| l).sum();

    let mut seizures = Vec::new();
    let mut left = seized_total;
    for (tier, locked) in positions {
        if left == 0 {
            break;
        }
        let take = left.min(locked);
        seizures.push((tier, take));
        left -= take;
    }

    LiquidationPlan {
        provider_id: provider,
        fraction_bps,
        transfers,
        seizures,
        locked_before,
        seized_total,
    }
}

/// Append-only log with engine-scoped ids.
#[derive(Debug, Default)]
pub struct LiquidationLog {
    records: Vec<LiquidationRecord>,
    next_id: u64,
}

impl LiquidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        plan: &LiquidationPlan,
        price: u64,
        at: Timestamp,
    ) -> LiquidationRecord {
        let record = LiquidationRecord {
            id: LiquidationId(self.next_id),
            provider_id: plan.provider_id,
            liquidated_amount: plan.seized_total,
            remaining_amount: plan.remaining(),
            liquidation_price: price,
            obligations_transferred: plan.obligation_ids(),
            at,
        };
        self.next_id += 1;
        self.records.push(record.clone());
        record
    }

    pub fn records(&self) -> &[LiquidationRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::{Backer, BackerShare, ObligationStatus, PolicyType, ProtectionObligation};
    use crate::types::AccountId;

    const P1: ProviderId = ProviderId(1);
    const T0: Timestamp = Timestamp(0);

    fn put(id: u64, backers: Vec<BackerShare>) -> ProtectionObligation {
        ProtectionObligation {
            id: ObligationId(id),
            owner: AccountId(50),
            policy_type: PolicyType::Put,
            protected_value: 4_500_000,
            protected_amount: 100_000,
            premium: 0,
            tier: TierName::Balanced,
            backers,
            created_at: T0,
            expires_at: Timestamp(1_000_000),
            status: ObligationStatus::Active,
        }
    }

    fn share(provider: u64, locked: u64) -> BackerShare {
        BackerShare { backer: Backer::Provider(ProviderId(provider)), locked }
    }

    #[test]
    fn plan_takes_the_fraction_of_each_share() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Balanced, 1_000, T0).unwrap();
        ledger.lock(P1, TierName::Balanced, 800, T0).unwrap();
        let mut book = ObligationBook::new();
        book.insert(put(1, vec![share(1, 500)]));
        book.insert(put(2, vec![share(1, 300), share(2, 700)]));

        let p = plan(P1, &ledger, &book, 5_000);
        assert_eq!(p.transfers, vec![(ObligationId(1), 250), (ObligationId(2), 150)]);
        assert_eq!(p.seized_total, 400);
        assert_eq!(p.locked_before, 800);
        assert_eq!(p.remaining(), 400);
    }

    #[test]
    fn fraction_clamped_to_governance_bounds() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Balanced, 1_000, T0).unwrap();
        ledger.lock(P1, TierName::Balanced, 1_000, T0).unwrap();
        let mut book = ObligationBook::new();
        book.insert(put(1, vec![share(1, 1_000)]));

        let too_low = plan(P1, &ledger, &book, 100);
        assert_eq!(too_low.fraction_bps, LIQUIDATION_FRACTION_MIN_BPS);
        assert_eq!(too_low.seized_total, 200);

        let too_high = plan(P1, &ledger, &book, 9_900);
        assert_eq!(too_high.fraction_bps, LIQUIDATION_FRACTION_MAX_BPS);
        assert_eq!(too_high.seized_total, 800);
    }

    #[test]
    fn seizure_splits_across_tier_positions() {
        // Provider locked in two tiers; seizure drains in tier order.
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Conservative, 300, T0).unwrap();
        ledger.lock(P1, TierName::Conservative, 300, T0).unwrap();
        ledger.deposit(P1, TierName::Balanced, 700, T0).unwrap();
        ledger.lock(P1, TierName::Balanced, 700, T0).unwrap();
        let mut book = ObligationBook::new();
        book.insert(put(1, vec![share(1, 1_000)]));

        let p = plan(P1, &ledger, &book, 5_000);
        assert_eq!(p.seized_total, 500);
        assert_eq!(
            p.seizures,
            vec![(TierName::Conservative, 300), (TierName::Balanced, 200)]
        );
    }

    #[test]
    fn floor_division_never_overshoots() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Balanced, 10, T0).unwrap();
        ledger.lock(P1, TierName::Balanced, 3, T0).unwrap();
        let mut book = ObligationBook::new();
        book.insert(put(1, vec![share(1, 3)]));

        let p = plan(P1, &ledger, &book, 5_000);
        // floor(3 × 0.5) = 1, strictly less than half.
        assert_eq!(p.seized_total, 1);
        assert!(p.seized_total <= mul_div(p.locked_before, p.fraction_bps, BPS_DENOM));
    }

    #[test]
    fn provider_with_nothing_backed_plans_empty() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Balanced, 1_000, T0).unwrap();
        let book = ObligationBook::new();
        let p = plan(P1, &ledger, &book, 5_000);
        assert!(p.transfers.is_empty());
        assert_eq!(p.seized_total, 0);
    }

    #[test]
    fn log_ids_increment_and_records_append() {
        let mut ledger = ProviderLedger::new();
        ledger.deposit(P1, TierName::Balanced, 1_000, T0).unwrap();
        ledger.lock(P1, TierName::Balanced, 800, T0).unwrap();
        let mut book = ObligationBook::new();
        book.insert(put(1, vec![share(1, 800)]));

        let p = plan(P1, &ledger, &book, 5_000);
        let mut log = LiquidationLog::new();
        let r1 = log.append(&p, 4_000_000, Timestamp(10));
        let r2 = log.append(&p, 3_900_000, Timestamp(20));
        assert_eq!(r1.id, LiquidationId(0));
        assert_eq!(r2.id, LiquidationId(1));
        assert_eq!(log.records().len(), 2);
        assert_eq!(r1.remaining_amount, 400);
    }
}
