use crate::tiers::{RiskTier, TierName};
use crate::types::Timestamp;

/// Hard bounds on the forced-liquidation fraction. Governance may tune the
/// default anywhere inside [20%, 80%]; values outside are clamped at
/// execution time and rejected for voluntary self-liquidation.
pub const LIQUIDATION_FRACTION_MIN_BPS: u64 = 2_000;
pub const LIQUIDATION_FRACTION_MAX_BPS: u64 = 8_000;

/// Engine-wide parameters. Everything here is governance-settable; tier
/// parameters live in the `TierRegistry` snapshot instead.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Platform share of every premium, in bps.
    pub platform_fee_bps: u64,
    /// Margin-call grace period when a provider is merely in the warning band.
    pub warning_grace_secs: u64,
    /// Grace period once under-collateralized. Strictly shorter than warning.
    pub emergency_grace_secs: u64,
    /// Fraction of locked collateral seized by a forced liquidation, in bps.
    pub liquidation_fraction_bps: u64,
    /// A price older than this (relative to the acting tick) is stale and
    /// flips the engine into safe mode.
    pub price_staleness_max_secs: u64,
}

impl EngineConfig {
    pub fn canonical() -> Self {
        EngineConfig {
            platform_fee_bps: 500,                         // 5%
            warning_grace_secs: Timestamp::days(1),        // 24h to top up
            emergency_grace_secs: Timestamp::SECS_PER_HOUR, // 1h once under water
            liquidation_fraction_bps: 5_000,               // 50% partial seizure
            price_staleness_max_secs: 5 * 60,              // 5 minutes
        }
    }
}

/// Canonical tier table. Value bounds are strike as bps of spot; collateral
/// amounts throughout the engine are sats.
///
/// Conservative: deep out-of-the-money, short-dated, cheapest premium.
/// Balanced: near-the-money, the default book.
/// Aggressive: at/in-the-money, long-dated, priced and collateralized up.
pub fn canonical_tiers() -> Vec<RiskTier> {
    vec![
        RiskTier {
            name: TierName::Conservative,
            min_value_bps: 7_000,              // strike 70% of spot
            max_value_bps: 9_000,              //        90% of spot
            premium_multiplier_bps: 8_000,     // ×0.8
            max_duration_secs: Timestamp::days(30),
            min_collateral_ratio_bps: 11_000,  // 110%
            warning_buffer_bps: 1_000,         // warn below 120%
            active: true,
        },
        RiskTier {
            name: TierName::Balanced,
            min_value_bps: 9_000,
            max_value_bps: 10_000,
            premium_multiplier_bps: 10_000,    // ×1.0
            max_duration_secs: Timestamp::days(90),
            min_collateral_ratio_bps: 12_000,  // 120%
            warning_buffer_bps: 1_000,
            active: true,
        },
        RiskTier {
            name: TierName::Aggressive,
            min_value_bps: 10_000,
            max_value_bps: 12_000,
            premium_multiplier_bps: 15_000,    // ×1.5
            max_duration_secs: Timestamp::days(180),
            min_collateral_ratio_bps: 13_000,  // 130%
            warning_buffer_bps: 1_500,
            active: true,
        },
    ]
}
