use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObligationId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LiquidationId(pub u64);

/// Buyer account reference. Opaque to the engine; buyers are settled by the
/// external policy registry; the engine only records who owns an obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

/// Collateral amounts are sats (1 BTC = 100_000_000 sats).
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Prices and protected values are USD cents per whole BTC.
/// Ratios, fees, and fractions are basis points (10_000 = 100%).
pub const BPS_DENOM: u64 = 10_000;

/// Engine time in whole seconds. Operations take an explicit `Timestamp`
/// rather than reading a clock, so a command sequence replays identically.
/// Deadlines are compared against the timestamp of the triggering tick;
/// nothing in the engine waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const SECS_PER_HOUR: u64 = 3_600;
    pub const SECS_PER_DAY: u64 = 86_400;

    pub fn offset(self, secs: u64) -> Self {
        Timestamp(self.0 + secs)
    }

    pub fn days(n: u64) -> u64 {
        n * Self::SECS_PER_DAY
    }
}

/// Multiply a sats amount by a price (cents per BTC) into a cents value,
/// widening through u128. Floor division.
pub fn sats_to_cents(sats: u64, price_cents: u64) -> u64 {
    (sats as u128 * price_cents as u128 / SATS_PER_BTC as u128) as u64
}

/// `amount × numerator / denominator` with u128 widening, floor division.
/// Callers are responsible for `denominator > 0`.
pub fn mul_div(amount: u64, numerator: u64, denominator: u64) -> u64 {
    (amount as u128 * numerator as u128 / denominator as u128) as u64
}
