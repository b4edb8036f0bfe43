use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::BPS_DENOM;

/// Closed set of risk tiers. Governance can retune a tier's parameters or
/// deactivate it, but cannot invent tiers outside this set; downstream
/// state (positions, obligations, premium carry) is keyed by these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TierName {
    Conservative,
    Balanced,
    Aggressive,
}

impl TierName {
    pub const ALL: [TierName; 3] =
        [TierName::Conservative, TierName::Balanced, TierName::Aggressive];
}

/// Parameters of one capital tier. Value bounds are the protected value as a
/// fraction of spot, in bps: a 9_000–10_000 tier accepts strikes between 90%
/// and 100% of the current price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskTier {
    pub name: TierName,
    pub min_value_bps: u64,
    pub max_value_bps: u64,
    /// Scales the externally quoted base premium; 10_000 = ×1.
    pub premium_multiplier_bps: u64,
    pub max_duration_secs: u64,
    /// Minimum collateral-to-obligation ratio, ≥ 10_000 (100%).
    pub min_collateral_ratio_bps: u64,
    /// Width of the warning band above the minimum ratio.
    pub warning_buffer_bps: u64,
    pub active: bool,
}

impl RiskTier {
    fn validate(&self) -> Result<(), EngineError> {
        if self.min_value_bps >= self.max_value_bps
            || self.min_collateral_ratio_bps < BPS_DENOM
        {
            return Err(EngineError::InvalidTierDefinition(self.name));
        }
        Ok(())
    }

    fn width_bps(&self) -> u64 {
        self.max_value_bps - self.min_value_bps
    }
}

/// Read-only snapshot of governance-defined tiers. The engine never writes
/// tier definitions; `apply_snapshot` is the one-directional governance path.
#[derive(Debug, Clone)]
pub struct TierRegistry {
    tiers: Vec<RiskTier>,
}

impl TierRegistry {
    pub fn new(tiers: Vec<RiskTier>) -> Result<Self, EngineError> {
        for t in &tiers {
            t.validate()?;
        }
        Ok(TierRegistry { tiers })
    }

    pub fn get(&self, name: TierName) -> Result<&RiskTier, EngineError> {
        self.tiers
            .iter()
            .find(|t| t.name == name)
            .ok_or(EngineError::UnknownTier(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskTier> {
        self.tiers.iter()
    }

    /// Replace the tier set from a governance snapshot. All-or-nothing: an
    /// invalid tier rejects the whole snapshot and leaves the registry as is.
    pub fn apply_snapshot(&mut self, tiers: Vec<RiskTier>) -> Result<(), EngineError> {
        for t in &tiers {
            t.validate()?;
        }
        self.tiers = tiers;
        Ok(())
    }

    /// Select the tier for a protected value (as bps of spot) and duration.
    /// Bounds are inclusive. When several tiers qualify the narrowest value
    /// range wins; ties break on registry order. Inactive tiers never match.
    pub fn classify(
        &self,
        protected_value_bps: u64,
        duration_secs: u64,
    ) -> Result<&RiskTier, EngineError> {
        self.tiers
            .iter()
            .filter(|t| {
                t.active
                    && protected_value_bps >= t.min_value_bps
                    && protected_value_bps <= t.max_value_bps
                    && duration_secs <= t.max_duration_secs
            })
            .min_by_key(|t| t.width_bps())
            .ok_or(EngineError::NoMatchingTier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::canonical_tiers;
    use crate::types::Timestamp;

    fn registry() -> TierRegistry {
        TierRegistry::new(canonical_tiers()).unwrap()
    }

    // ── classification ────────────────────────────────────────────────────────

    #[test]
    fn strike_at_95_pct_lands_in_balanced() {
        let reg = registry();
        let tier = reg.classify(9_500, Timestamp::days(30)).unwrap();
        assert_eq!(tier.name, TierName::Balanced);
    }

    #[test]
    fn deep_otm_strike_lands_in_conservative() {
        let reg = registry();
        let tier = reg.classify(8_000, Timestamp::days(10)).unwrap();
        assert_eq!(tier.name, TierName::Conservative);
    }

    #[test]
    fn itm_strike_lands_in_aggressive() {
        let reg = registry();
        let tier = reg.classify(10_500, Timestamp::days(30)).unwrap();
        assert_eq!(tier.name, TierName::Aggressive);
    }

    #[test]
    fn boundary_strike_prefers_narrowest_tier() {
        // 9_000 bps qualifies for Conservative (7_000–9_000, width 2_000)
        // and Balanced (9_000–10_000, width 1_000). Narrowest wins.
        let reg = registry();
        let tier = reg.classify(9_000, Timestamp::days(10)).unwrap();
        assert_eq!(tier.name, TierName::Balanced);
    }

    #[test]
    fn duration_beyond_tier_maximum_is_rejected() {
        let reg = registry();
        // Conservative caps at 30 days; 60 days must fall through.
        let result = reg.classify(8_000, Timestamp::days(60));
        assert_eq!(result.unwrap_err(), EngineError::NoMatchingTier);
    }

    #[test]
    fn strike_outside_all_ranges_is_rejected() {
        let reg = registry();
        let result = reg.classify(13_000, Timestamp::days(10));
        assert_eq!(result.unwrap_err(), EngineError::NoMatchingTier);
    }

    #[test]
    fn inactive_tier_never_matches() {
        let mut tiers = canonical_tiers();
        for t in &mut tiers {
            if t.name == TierName::Balanced {
                t.active = false;
            }
        }
        let reg = TierRegistry::new(tiers).unwrap();
        // 9_500 is inside Balanced only; with Balanced inactive nothing matches.
        let result = reg.classify(9_500, Timestamp::days(10));
        assert_eq!(result.unwrap_err(), EngineError::NoMatchingTier);
    }

    // ── governance snapshot ───────────────────────────────────────────────────

    #[test]
    fn snapshot_with_inverted_range_is_rejected_whole() {
        let mut reg = registry();
        let mut bad = canonical_tiers();
        bad[0].min_value_bps = bad[0].max_value_bps + 1;
        assert!(reg.apply_snapshot(bad).is_err());
        // Registry unchanged: canonical classification still works.
        assert!(reg.classify(9_500, Timestamp::days(30)).is_ok());
    }

    #[test]
    fn snapshot_with_sub_100_pct_min_ratio_is_rejected() {
        let mut reg = registry();
        let mut bad = canonical_tiers();
        bad[0].min_collateral_ratio_bps = 9_999;
        assert!(reg.apply_snapshot(bad).is_err());
    }

    #[test]
    fn snapshot_retunes_parameters() {
        let mut reg = registry();
        let mut tiers = canonical_tiers();
        for t in &mut tiers {
            if t.name == TierName::Aggressive {
                t.min_collateral_ratio_bps = 14_000;
            }
        }
        reg.apply_snapshot(tiers).unwrap();
        assert_eq!(
            reg.get(TierName::Aggressive).unwrap().min_collateral_ratio_bps,
            14_000
        );
    }
}
