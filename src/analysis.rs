//! Event-log verification: replay a recorded log and check the properties
//! that must hold over any run, independent of the state that produced it.
//! Used by the CLI after a stress run and by the `replay` binary against a
//! previously written NDJSON file.

use std::collections::HashMap;
use std::fmt;

use crate::events::{EngineEvent, EngineRecord};
use crate::tiers::TierName;
use crate::types::{ObligationId, ProviderId};

/// Ordering / state-machine rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanicsViolation {
    /// A margin call deadline moved later within one call episode.
    DeadlineLengthened { provider: ProviderId, from: u64, to: u64 },
    /// A liquidation fired for a provider with no open margin call.
    LiquidationWithoutCall { provider: ProviderId },
    /// A provider withdrew while under an open margin call.
    WithdrawalDuringCall { provider: ProviderId },
    /// Safe mode exited without having been entered.
    SafeModeExitUnpaired,
    /// Log records are not timestamp-ordered.
    OutOfOrder { index: usize },
}

impl fmt::Display for MechanicsViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MechanicsViolation::DeadlineLengthened { provider, from, to } => {
                write!(f, "deadline for {provider:?} lengthened {from} -> {to}")
            }
            MechanicsViolation::LiquidationWithoutCall { provider } => {
                write!(f, "liquidation of {provider:?} without an open margin call")
            }
            MechanicsViolation::WithdrawalDuringCall { provider } => {
                write!(f, "withdrawal by {provider:?} during an open margin call")
            }
            MechanicsViolation::SafeModeExitUnpaired => {
                write!(f, "safe mode exited without entry")
            }
            MechanicsViolation::OutOfOrder { index } => {
                write!(f, "log record {index} is older than its predecessor")
            }
        }
    }
}

/// Value-conservation rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationViolation {
    /// fee + credited + carry != amount + carry_in for one distribution.
    PremiumLeak { tier: TierName, amount: u64, accounted: u64 },
    /// Per-obligation transfers around a liquidation don't sum to its total.
    TransferSumMismatch { provider: ProviderId, expected: u64, actual: u64 },
    /// A reservation with no backers or zero collateral.
    EmptyReservation { obligation: ObligationId },
}

impl fmt::Display for ConservationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConservationViolation::PremiumLeak { tier, amount, accounted } => {
                write!(f, "premium leak in {tier:?}: {amount} in, {accounted} accounted")
            }
            ConservationViolation::TransferSumMismatch { provider, expected, actual } => {
                write!(f, "transfer sum for {provider:?}: expected {expected}, got {actual}")
            }
            ConservationViolation::EmptyReservation { obligation } => {
                write!(f, "reservation {obligation:?} carries no collateral")
            }
        }
    }
}

pub fn verify_mechanics(log: &[EngineRecord]) -> Vec<MechanicsViolation> {
    let mut violations = Vec::new();
    let mut open_calls: HashMap<ProviderId, u64> = HashMap::new();
    let mut safe_mode_depth = 0usize;
    let mut last_at = 0u64;

    for (i, rec) in log.iter().enumerate() {
        if rec.at.0 < last_at {
            violations.push(MechanicsViolation::OutOfOrder { index: i });
        }
        last_at = rec.at.0;

        match &rec.event {
            EngineEvent::MarginCallIssued { provider_id, deadline, .. } => {
                open_calls.insert(*provider_id, deadline.0);
            }
            EngineEvent::MarginCallRefreshed { provider_id, deadline, .. } => {
                match open_calls.get(provider_id) {
                    Some(&prev) if deadline.0 > prev => {
                        violations.push(MechanicsViolation::DeadlineLengthened {
                            provider: *provider_id,
                            from: prev,
                            to: deadline.0,
                        });
                    }
                    _ => {}
                }
                open_calls.insert(*provider_id, deadline.0);
            }
            EngineEvent::MarginCallResolved { provider_id, .. } => {
                open_calls.remove(provider_id);
            }
            EngineEvent::LiquidationExecuted { provider_id, .. } => {
                if !open_calls.contains_key(provider_id) {
                    violations.push(MechanicsViolation::LiquidationWithoutCall {
                        provider: *provider_id,
                    });
                } else {
                    // Forced liquidation closes the episode; a voluntary one
                    // is followed by an explicit MarginCallResolved.
                    open_calls.remove(provider_id);
                }
            }
            EngineEvent::Withdrawn { provider_id, .. } => {
                if open_calls.contains_key(provider_id) {
                    violations.push(MechanicsViolation::WithdrawalDuringCall {
                        provider: *provider_id,
                    });
                }
            }
            EngineEvent::SafeModeEntered { .. } => safe_mode_depth += 1,
            EngineEvent::SafeModeExited { .. } => {
                if safe_mode_depth == 0 {
                    violations.push(MechanicsViolation::SafeModeExitUnpaired);
                } else {
                    safe_mode_depth -= 1;
                }
            }
            _ => {}
        }
    }
    violations
}

pub fn verify_conservation(log: &[EngineRecord]) -> Vec<ConservationViolation> {
    let mut violations = Vec::new();
    let mut carry: HashMap<TierName, u64> = HashMap::new();
    // Transfers accumulate until the LiquidationExecuted that closes them.
    let mut pending_transfers: HashMap<ProviderId, u64> = HashMap::new();

    for rec in log {
        match &rec.event {
            EngineEvent::PremiumDistributed { tier, amount, platform_fee, credited, carry: carry_out } => {
                let carry_in = carry.get(tier).copied().unwrap_or(0);
                let accounted = platform_fee + credited + carry_out;
                if accounted != amount + carry_in {
                    violations.push(ConservationViolation::PremiumLeak {
                        tier: *tier,
                        amount: amount + carry_in,
                        accounted,
                    });
                }
                carry.insert(*tier, *carry_out);
            }
            EngineEvent::ObligationTransferred { provider_id, amount, .. } => {
                *pending_transfers.entry(*provider_id).or_insert(0) += amount;
            }
            EngineEvent::LiquidationExecuted { provider_id, liquidated_amount, .. } => {
                let actual = pending_transfers.remove(provider_id).unwrap_or(0);
                if actual != *liquidated_amount {
                    violations.push(ConservationViolation::TransferSumMismatch {
                        provider: *provider_id,
                        expected: *liquidated_amount,
                        actual,
                    });
                }
            }
            EngineEvent::ObligationReserved { obligation_id, required_collateral, backer_count, .. } => {
                if *required_collateral == 0 || *backer_count == 0 {
                    violations.push(ConservationViolation::EmptyReservation {
                        obligation: *obligation_id,
                    });
                }
            }
            _ => {}
        }
    }
    violations
}
