use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::health::{HealthReport, HealthStatus};
use crate::tiers::TierName;
use crate::types::{ProviderId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarginCallStatus {
    Active,
    Resolved,
    Liquidated,
}

/// A time-boxed demand that a provider restore adequate collateral.
/// One active call per provider; repeated triggers refresh it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarginCall {
    pub provider_id: ProviderId,
    pub issued_at: Timestamp,
    pub deadline: Timestamp,
    /// Cents of collateral value missing at last assessment.
    pub deficit: u64,
    pub current_ratio_bps: u64,
    pub min_ratio_bps: u64,
    pub severity: HealthStatus,
    pub status: MarginCallStatus,
}

/// How a provider (or the market) satisfied a margin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionKind {
    TopUp,
    MigrateTier,
    SelfLiquidate,
    /// Price moved back; a sweep found the ratio above minimum again.
    MarketRecovery,
}

/// Provider-chosen resolution action, passed into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    TopUp { tier: TierName, amount: u64 },
    MigrateTier { from: TierName, to: TierName },
    SelfLiquidate { fraction_bps: u64 },
}

impl ResolutionMethod {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            ResolutionMethod::TopUp { .. } => ResolutionKind::TopUp,
            ResolutionMethod::MigrateTier { .. } => ResolutionKind::MigrateTier,
            ResolutionMethod::SelfLiquidate { .. } => ResolutionKind::SelfLiquidate,
        }
    }
}

/// What a health report did to the call book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarginTransition {
    Issued(MarginCall),
    Refreshed { call: MarginCall, escalated: bool },
    Recovered(MarginCall),
}

#[derive(Debug, Default)]
pub struct MarginCallBook {
    active: HashMap<ProviderId, MarginCall>,
    /// Terminal calls, kept for audit.
    pub history: Vec<MarginCall>,
}

impl MarginCallBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self, provider: ProviderId) -> Option<&MarginCall> {
        self.active.get(&provider)
    }

    pub fn has_active(&self, provider: ProviderId) -> bool {
        self.active.contains_key(&provider)
    }

    /// Apply one health verdict. Issues, refreshes, escalates, or
    /// auto-resolves; the deadline moves in one direction only: it shortens
    /// on a Warning→UnderCollateralized escalation and never lengthens.
    pub fn on_report(
        &mut self,
        report: &HealthReport,
        now: Timestamp,
        warning_grace_secs: u64,
        emergency_grace_secs: u64,
    ) -> Option<MarginTransition> {
        let provider = report.provider_id;
        match report.status {
            HealthStatus::Healthy => {
                let mut call = self.active.remove(&provider)?;
                call.status = MarginCallStatus::Resolved;
                call.current_ratio_bps = report.ratio_bps;
                call.deficit = 0;
                self.history.push(call.clone());
                Some(MarginTransition::Recovered(call))
            }
            HealthStatus::Warning | HealthStatus::UnderCollateralized => {
                let grace = if report.status == HealthStatus::UnderCollateralized {
                    emergency_grace_secs
                } else {
                    warning_grace_secs
                };
                match self.active.get_mut(&provider) {
                    None => {
                        let call = MarginCall {
                            provider_id: provider,
                            issued_at: now,
                            deadline: now.offset(grace),
                            deficit: report.deficit,
                            current_ratio_bps: report.ratio_bps,
                            min_ratio_bps: report.min_ratio_bps,
                            severity: report.status,
                            status: MarginCallStatus::Active,
                        };
                        self.active.insert(provider, call.clone());
                        Some(MarginTransition::Issued(call))
                    }
                    Some(call) => {
                        let escalated = report.status > call.severity;
                        call.deficit = report.deficit;
                        call.current_ratio_bps = report.ratio_bps;
                        call.min_ratio_bps = report.min_ratio_bps;
                        call.severity = report.status;
                        if escalated {
                            let emergency = now.offset(emergency_grace_secs);
                            call.deadline = call.deadline.min(emergency);
                        }
                        Some(MarginTransition::Refreshed { call: call.clone(), escalated })
                    }
                }
            }
        }
    }

    /// Mark the provider's active call resolved through an explicit method.
    pub fn resolve(
        &mut self,
        provider: ProviderId,
        ratio_bps: u64,
    ) -> Result<MarginCall, EngineError> {
        let mut call = self
            .active
            .remove(&provider)
            .ok_or(EngineError::NoActiveMarginCall(provider))?;
        call.status = MarginCallStatus::Resolved;
        call.current_ratio_bps = ratio_bps;
        call.deficit = 0;
        self.history.push(call.clone());
        Ok(call)
    }

    /// Terminal transition after a forced liquidation.
    pub fn mark_liquidated(&mut self, provider: ProviderId) -> Result<MarginCall, EngineError> {
        let mut call = self
            .active
            .remove(&provider)
            .ok_or(EngineError::NoActiveMarginCall(provider))?;
        call.status = MarginCallStatus::Liquidated;
        self.history.push(call.clone());
        Ok(call)
    }

    /// Active calls whose deadline has passed, in deterministic order.
    /// Scanned by the tick; nothing holds a timer per call.
    pub fn overdue(&self, now: Timestamp) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .active
            .values()
            .filter(|c| now > c.deadline)
            .map(|c| c.provider_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
