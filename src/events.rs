use serde::{Deserialize, Serialize};

use crate::health::HealthStatus;
use crate::margin::ResolutionKind;
use crate::tiers::TierName;
use crate::types::{AccountId, LiquidationId, ObligationId, ProviderId, Timestamp};

/// Everything observable the engine does. Asynchronous transitions (margin
/// calls, liquidations, safe mode) are surfaced here rather than as return
/// values; notification delivery is a downstream consumer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    Deposited {
        provider_id: ProviderId,
        tier: TierName,
        amount: u64,
    },
    Withdrawn {
        provider_id: ProviderId,
        tier: TierName,
        amount: u64,
    },
    ObligationReserved {
        obligation_id: ObligationId,
        owner: AccountId,
        tier: TierName,
        required_collateral: u64,
        backer_count: usize,
    },
    PremiumDistributed {
        tier: TierName,
        amount: u64,
        platform_fee: u64,
        credited: u64,
        carry: u64,
    },
    MarginCallIssued {
        provider_id: ProviderId,
        severity: HealthStatus,
        ratio_bps: u64,
        min_ratio_bps: u64,
        deficit: u64,
        deadline: Timestamp,
    },
    /// An already-active call re-assessed under a new price. Deadline is
    /// included so log consumers can verify it never moves later.
    MarginCallRefreshed {
        provider_id: ProviderId,
        severity: HealthStatus,
        ratio_bps: u64,
        deficit: u64,
        deadline: Timestamp,
    },
    MarginCallResolved {
        provider_id: ProviderId,
        method: ResolutionKind,
        ratio_bps: u64,
    },
    PositionMigrated {
        provider_id: ProviderId,
        from: TierName,
        to: TierName,
        deposited: u64,
        locked: u64,
    },
    ObligationTransferred {
        obligation_id: ObligationId,
        provider_id: ProviderId,
        amount: u64,
    },
    LiquidationExecuted {
        liquidation_id: LiquidationId,
        provider_id: ProviderId,
        liquidated_amount: u64,
        remaining_amount: u64,
        liquidation_price: u64,
        obligations_transferred: usize,
        price_stale: bool,
    },
    ObligationExpired {
        obligation_id: ObligationId,
        released: u64,
    },
    ObligationExercised {
        obligation_id: ObligationId,
        paid_out: u64,
    },
    ObligationCanceled {
        obligation_id: ObligationId,
        released: u64,
    },
    SafeModeEntered {
        last_good_price: u64,
    },
    SafeModeExited {
        price: u64,
    },
    ProviderHalted {
        provider_id: ProviderId,
    },
    TierHalted {
        tier: TierName,
    },
}

/// Unified log entry: the timestamp of the command that produced the event
/// plus the event itself. The log is append-only and command-ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRecord {
    pub at: Timestamp,
    pub event: EngineEvent,
}

pub type EventLog = Vec<EngineRecord>;

#[cfg(test)]
mod tests {
    use std::io::{BufWriter, Write};

    use super::*;

    #[test]
    fn record_serializes_at_and_event_fields() {
        let rec = EngineRecord {
            at: Timestamp(42),
            event: EngineEvent::Deposited {
                provider_id: ProviderId(1),
                tier: TierName::Balanced,
                amount: 5_000,
            },
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            json,
            r#"{"at":42,"event":{"Deposited":{"provider_id":1,"tier":"Balanced","amount":5000}}}"#
        );
    }

    #[test]
    fn liquidation_event_json_shape() {
        let rec = EngineRecord {
            at: Timestamp(100),
            event: EngineEvent::LiquidationExecuted {
                liquidation_id: LiquidationId(0),
                provider_id: ProviderId(3),
                liquidated_amount: 400,
                remaining_amount: 400,
                liquidation_price: 4_000_000,
                obligations_transferred: 2,
                price_stale: false,
            },
        };
        let value = serde_json::to_value(&rec).unwrap();
        let ev = &value["event"]["LiquidationExecuted"];
        assert_eq!(ev["provider_id"], 3);
        assert_eq!(ev["liquidated_amount"], 400);
        assert_eq!(ev["price_stale"], false);
    }

    #[test]
    fn ndjson_stream_one_line_per_event() {
        let records = vec![
            EngineRecord {
                at: Timestamp(0),
                event: EngineEvent::SafeModeEntered { last_good_price: 5_000_000 },
            },
            EngineRecord {
                at: Timestamp(1),
                event: EngineEvent::SafeModeExited { price: 5_100_000 },
            },
        ];

        let mut buf: Vec<u8> = Vec::new();
        {
            let mut writer = BufWriter::new(&mut buf);
            for r in &records {
                serde_json::to_writer(&mut writer, r).unwrap();
                writeln!(writer).unwrap();
            }
        }

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v.get("at").is_some(), "missing 'at' key in: {line}");
            assert!(v.get("event").is_some(), "missing 'event' key in: {line}");
        }
    }
}
