use thiserror::Error;

use crate::tiers::TierName;
use crate::types::{ObligationId, ProviderId};

/// Coarse classification used by callers to decide retry/surface behavior.
/// Validation and capacity failures are synchronous rejections with no state
/// touched; state conflicts are retryable; external-dependency failures flip
/// the engine into safe mode where applicable; invariant violations halt the
/// affected provider or tier until governance intervenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Capacity,
    StateConflict,
    ExternalDependency,
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("unknown provider {0:?}")]
    UnknownProvider(ProviderId),
    #[error("unknown obligation {0:?}")]
    UnknownObligation(ObligationId),
    #[error("tier {0:?} is not registered")]
    UnknownTier(TierName),
    #[error("tier {0:?} is not accepting new positions")]
    TierInactive(TierName),
    #[error("liquidation fraction {0} bps outside permitted bounds")]
    FractionOutOfBounds(u64),
    #[error("target tier {0:?} is not less strict than the current tier")]
    MigrationNotLenient(TierName),
    #[error("tier {0:?} has an invalid definition")]
    InvalidTierDefinition(TierName),

    // ── Capacity ─────────────────────────────────────────────────────────────
    #[error("no tier covers this protected value and duration")]
    NoMatchingTier,
    #[error("tier {tier:?} has {available} sats free, {needed} required")]
    InsufficientTierCapital {
        tier: TierName,
        needed: u64,
        available: u64,
    },
    #[error("withdrawal of {requested} exceeds available balance {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    // ── State conflict ───────────────────────────────────────────────────────
    #[error("provider {0:?} has no active margin call")]
    NoActiveMarginCall(ProviderId),
    #[error("obligation {0:?} is no longer active")]
    ObligationNotActive(ObligationId),
    #[error("withdrawal blocked: provider {0:?} is under an active margin call")]
    WithdrawalBlocked(ProviderId),
    #[error("resolution left ratio {ratio_bps} bps below minimum {min_bps} bps")]
    ResolutionInsufficient { ratio_bps: u64, min_bps: u64 },
    #[error("withdrawal would leave ratio {ratio_bps} bps below minimum {min_bps} bps")]
    WithdrawalUnsafe { ratio_bps: u64, min_bps: u64 },

    // ── External dependency ──────────────────────────────────────────────────
    #[error("price source unavailable")]
    PriceUnavailable,
    #[error("price is stale (as of {as_of}, now {now})")]
    PriceStale { as_of: u64, now: u64 },
    #[error("policy registry rejected the call: {0}")]
    RegistryFailure(String),
    #[error("insurance fund rejected the transfer: {0}")]
    FundFailure(String),

    // ── Invariant violation ──────────────────────────────────────────────────
    #[error("provider {provider:?}: locked {locked} exceeds deposited {deposited}")]
    LockedExceedsDeposited {
        provider: ProviderId,
        locked: u64,
        deposited: u64,
    },
    #[error("tier {tier:?} aggregate diverged: account says {account}, ledger sums to {ledger}")]
    TierAccountDiverged {
        tier: TierName,
        account: u64,
        ledger: u64,
    },
    #[error("provider {0:?} is halted pending governance review")]
    ProviderHalted(ProviderId),
    #[error("tier {0:?} is halted pending governance review")]
    TierHalted(TierName),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        use EngineError::*;
        match self {
            ZeroAmount
            | UnknownProvider(_)
            | UnknownObligation(_)
            | UnknownTier(_)
            | TierInactive(_)
            | FractionOutOfBounds(_)
            | MigrationNotLenient(_)
            | InvalidTierDefinition(_) => ErrorClass::Validation,

            NoMatchingTier
            | InsufficientTierCapital { .. }
            | InsufficientBalance { .. } => ErrorClass::Capacity,

            NoActiveMarginCall(_)
            | ObligationNotActive(_)
            | WithdrawalBlocked(_)
            | ResolutionInsufficient { .. }
            | WithdrawalUnsafe { .. } => ErrorClass::StateConflict,

            PriceUnavailable
            | PriceStale { .. }
            | RegistryFailure(_)
            | FundFailure(_) => ErrorClass::ExternalDependency,

            LockedExceedsDeposited { .. }
            | TierAccountDiverged { .. }
            | ProviderHalted(_)
            | TierHalted(_) => ErrorClass::InvariantViolation,
        }
    }
}
