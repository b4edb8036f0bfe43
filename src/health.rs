use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ledger::ProviderLedger;
use crate::obligations::ObligationBook;
use crate::tiers::TierRegistry;
use crate::types::{BPS_DENOM, ProviderId, mul_div, sats_to_cents};

/// Ratio reported for a provider with no outstanding obligations: nothing is
/// required, so any collateral (including none) is infinitely sufficient.
pub const RATIO_INFINITE: u64 = u64::MAX;

/// Ordered by severity so escalation is a simple `>` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    UnderCollateralized,
}

/// Snapshot verdict on one provider at one price. Derived, never stored:
/// recomputing from current state and price must give the same answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub provider_id: ProviderId,
    pub status: HealthStatus,
    pub ratio_bps: u64,
    /// Collateral value at the assessment price, cents.
    pub collateral_value: u64,
    /// Obligation requirement at the assessment price, cents.
    pub required_value: u64,
    /// Strictest minimum among tiers this provider currently backs.
    pub min_ratio_bps: u64,
    pub warning_buffer_bps: u64,
    /// Cents of additional collateral value needed to reach the minimum.
    pub deficit: u64,
}

/// Assess one provider at `price` (cents per BTC). `less_collateral_sats`
/// lets a withdrawal pre-check ask "what if this much were already gone"
/// without touching the ledger.
pub fn assess(
    provider: ProviderId,
    ledger: &ProviderLedger,
    book: &ObligationBook,
    registry: &TierRegistry,
    price: u64,
    less_collateral_sats: u64,
) -> HealthReport {
    let collateral_sats: u64 = ledger
        .positions_of(provider)
        .map(|p| p.deposited)
        .sum::<u64>()
        .saturating_sub(less_collateral_sats);
    let collateral_value = sats_to_cents(collateral_sats, price);

    // Provider's slice of each backed obligation's requirement, recomputed
    // at the current price. Slices scale by the sats share held.
    let mut required_sats: u64 = 0;
    for ob in book.backed_by(provider) {
        let total = ob.total_locked();
        if total == 0 {
            continue;
        }
        let share = ob.provider_share(provider);
        required_sats += mul_div(ob.required_collateral_at(price), share, total);
    }
    let required_value = sats_to_cents(required_sats, price);

    // The applicable minimum follows where the backing capital sits: the
    // strictest minimum among tiers in which this provider holds locked
    // collateral. Migrating to a laxer tier relaxes the threshold.
    let mut min_ratio_bps: u64 = 0;
    let mut warning_buffer_bps: u64 = 0;
    for pos in ledger.positions_of(provider).filter(|p| p.locked > 0) {
        if let Ok(tier) = registry.get(pos.tier)
            && tier.min_collateral_ratio_bps > min_ratio_bps
        {
            min_ratio_bps = tier.min_collateral_ratio_bps;
            warning_buffer_bps = tier.warning_buffer_bps;
        }
    }

    if required_value == 0 {
        return HealthReport {
            provider_id: provider,
            status: HealthStatus::Healthy,
            ratio_bps: RATIO_INFINITE,
            collateral_value,
            required_value: 0,
            min_ratio_bps,
            warning_buffer_bps,
            deficit: 0,
        };
    }

    let ratio_bps =
        (collateral_value as u128 * BPS_DENOM as u128 / required_value as u128) as u64;
    let status = if ratio_bps < min_ratio_bps {
        HealthStatus::UnderCollateralized
    } else if ratio_bps < min_ratio_bps + warning_buffer_bps {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    let min_required_value = mul_div(required_value, min_ratio_bps, BPS_DENOM);
    let deficit = min_required_value.saturating_sub(collateral_value);

    HealthReport {
        provider_id: provider,
        status,
        ratio_bps,
        collateral_value,
        required_value,
        min_ratio_bps,
        warning_buffer_bps,
        deficit,
    }
}

/// Assess every provider at once. The computation is pure per provider, so
/// the batch fans out across threads; result order follows the input order
/// regardless of scheduling.
pub fn sweep(
    providers: &[ProviderId],
    ledger: &ProviderLedger,
    book: &ObligationBook,
    registry: &TierRegistry,
    price: u64,
) -> Vec<HealthReport> {
    providers
        .par_iter()
        .map(|&p| assess(p, ledger, book, registry, price, 0))
        .collect()
}
