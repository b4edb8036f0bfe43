use log::{error, info, warn};

use crate::accounts::TierAccounts;
use crate::config::{EngineConfig, LIQUIDATION_FRACTION_MAX_BPS, LIQUIDATION_FRACTION_MIN_BPS};
use crate::error::EngineError;
use crate::events::{EngineEvent, EngineRecord, EventLog};
use crate::health::{self, HealthReport};
use crate::ledger::ProviderLedger;
use crate::liquidation::{self, LiquidationLog, LiquidationPlan, LiquidationRecord};
use crate::margin::{MarginCall, MarginCallBook, MarginTransition, ResolutionKind, ResolutionMethod};
use crate::obligations::{
    Backer, BackerShare, ObligationBook, ObligationStatus, PolicyType, ProtectionObligation,
};
use crate::ports::{InsuranceFund, PolicyRegistry, PremiumCalculator, PriceQuote, PriceSource};
use crate::premium::{Distribution, PremiumSettlement};
use crate::tiers::{TierName, TierRegistry};
use crate::types::{AccountId, BPS_DENOM, ObligationId, ProviderId, Timestamp, mul_div};

/// A buyer's ask, as forwarded by the policy front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionRequest {
    pub owner: AccountId,
    pub policy_type: PolicyType,
    /// Strike, cents per BTC.
    pub protected_value: u64,
    /// Covered quantity, sats.
    pub protected_amount: u64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Exercised,
    Expired,
    Canceled,
}

/// What one price tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub price: u64,
    pub price_stale: bool,
    pub providers_swept: usize,
    pub calls_issued: usize,
    pub liquidated: Vec<ProviderId>,
    pub obligations_expired: usize,
}

/// The collateral engine. Single writer: every public operation mutates
/// owned state sequentially and appends to the event log, which keeps the
/// per-provider and per-tier bookkeeping invariants trivially serialized.
/// Collaborators are injected; the engine holds no clock and no RNG.
pub struct Engine {
    config: EngineConfig,
    registry: TierRegistry,
    ledger: ProviderLedger,
    accounts: TierAccounts,
    obligations: ObligationBook,
    premiums: PremiumSettlement,
    margin_calls: MarginCallBook,
    liquidations: LiquidationLog,
    price_source: Box<dyn PriceSource>,
    premium_calc: Box<dyn PremiumCalculator>,
    policy_registry: Box<dyn PolicyRegistry>,
    insurance_fund: Box<dyn InsuranceFund>,
    safe_mode: bool,
    last_good: Option<PriceQuote>,
    pub log: EventLog,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: TierRegistry,
        price_source: Box<dyn PriceSource>,
        premium_calc: Box<dyn PremiumCalculator>,
        policy_registry: Box<dyn PolicyRegistry>,
        insurance_fund: Box<dyn InsuranceFund>,
    ) -> Self {
        let platform_fee_bps = config.platform_fee_bps;
        Engine {
            config,
            registry,
            ledger: ProviderLedger::new(),
            accounts: TierAccounts::new(),
            obligations: ObligationBook::new(),
            premiums: PremiumSettlement::new(platform_fee_bps),
            margin_calls: MarginCallBook::new(),
            liquidations: LiquidationLog::new(),
            price_source,
            premium_calc,
            policy_registry,
            insurance_fund,
            safe_mode: false,
            last_good: None,
            log: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn tier_account(&self, tier: TierName) -> crate::accounts::TierAccount {
        self.accounts.get(tier)
    }

    pub fn position(&self, provider: ProviderId, tier: TierName) -> Option<&crate::ledger::ProviderPosition> {
        self.ledger.position(provider, tier)
    }

    pub fn margin_call(&self, provider: ProviderId) -> Option<&MarginCall> {
        self.margin_calls.active(provider)
    }

    pub fn obligation(&self, id: ObligationId) -> Result<&ProtectionObligation, EngineError> {
        self.obligations.get(id)
    }

    pub fn liquidation_records(&self) -> &[LiquidationRecord] {
        self.liquidations.records()
    }

    pub fn in_safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn premium_carry(&self, tier: TierName) -> u64 {
        self.premiums.carry(tier)
    }

    pub fn platform_fees_accrued(&self) -> u64 {
        self.premiums.platform_accrued()
    }

    /// Full consistency audit: per-position invariants plus a fresh
    /// reconciliation of every tier aggregate. Empty means sound.
    pub fn audit(&self) -> Vec<EngineError> {
        let mut findings = self.ledger.audit();
        for tier in TierName::ALL {
            if let Err(e) = self.accounts.reconcile(tier, &self.ledger) {
                findings.push(e);
            }
        }
        findings
    }

    // ── Governance ───────────────────────────────────────────────────────────

    /// One-directional write path: governance replaces the tier snapshot,
    /// the engine never edits tiers itself.
    pub fn apply_governance_snapshot(
        &mut self,
        tiers: Vec<crate::tiers::RiskTier>,
    ) -> Result<(), EngineError> {
        self.registry.apply_snapshot(tiers)
    }

    pub fn clear_provider_halt(&mut self, provider: ProviderId) {
        self.ledger.clear_halts(provider);
    }

    // ── Internal plumbing ────────────────────────────────────────────────────

    fn emit(&mut self, at: Timestamp, event: EngineEvent) {
        self.log.push(EngineRecord { at, event });
    }

    /// Fetch a price that is fresh at `now`, updating safe mode either way.
    fn fresh_price(&mut self, now: Timestamp) -> Result<u64, EngineError> {
        let outcome = match self.price_source.get_price() {
            Ok(q) if now.0.saturating_sub(q.as_of.0) > self.config.price_staleness_max_secs => {
                Err(EngineError::PriceStale { as_of: q.as_of.0, now: now.0 })
            }
            Ok(q) => Ok(q),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(q) => {
                self.last_good = Some(q);
                if self.safe_mode {
                    self.safe_mode = false;
                    info!("price feed recovered at {}, leaving safe mode", q.price);
                    self.emit(now, EngineEvent::SafeModeExited { price: q.price });
                }
                Ok(q.price)
            }
            Err(e) => {
                if !self.safe_mode {
                    self.safe_mode = true;
                    let last = self.last_good.map(|q| q.price).unwrap_or(0);
                    warn!("price feed degraded ({e}), entering safe mode");
                    self.emit(now, EngineEvent::SafeModeEntered { last_good_price: last });
                }
                Err(e)
            }
        }
    }

    /// Price for monitoring work: fresh if possible, else the last good
    /// price with a staleness flag. `None` until the first price arrives.
    fn monitoring_price(&mut self, now: Timestamp) -> Option<(u64, bool)> {
        match self.fresh_price(now) {
            Ok(p) => Some((p, false)),
            Err(_) => self.last_good.map(|q| (q.price, true)),
        }
    }

    /// Reconcile one tier's cached aggregate after a mutation settled.
    /// Divergence is unrecoverable for the tier: halt and surface.
    fn settle_tier(&mut self, tier: TierName, now: Timestamp) -> Result<(), EngineError> {
        if let Err(e) = self.accounts.reconcile(tier, &self.ledger) {
            error!("tier {tier:?} failed reconciliation: {e}");
            self.ledger.halt_tier(tier);
            self.emit(now, EngineEvent::TierHalted { tier });
            return Err(e);
        }
        Ok(())
    }

    // ── Deposits and withdrawals ─────────────────────────────────────────────

    pub fn deposit(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let t = self.registry.get(tier)?;
        if !t.active {
            return Err(EngineError::TierInactive(tier));
        }
        self.ledger.deposit(provider, tier, amount, now)?;
        self.accounts.on_deposit(tier, amount);
        self.settle_tier(tier, now)?;
        self.emit(now, EngineEvent::Deposited { provider_id: provider, tier, amount });
        Ok(())
    }

    /// Withdraw free collateral. Refused outright while a margin call is
    /// active, and pre-checked against health at the current price: the
    /// position must stay fully healthy after the withdrawal.
    pub fn request_withdrawal(
        &mut self,
        provider: ProviderId,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        if self.margin_calls.has_active(provider) {
            return Err(EngineError::WithdrawalBlocked(provider));
        }
        let pos = self
            .ledger
            .position(provider, tier)
            .ok_or(EngineError::UnknownProvider(provider))?;
        if amount > pos.available() {
            return Err(EngineError::InsufficientBalance {
                requested: amount,
                available: pos.available(),
            });
        }

        // Health pre-check only matters when the provider backs anything;
        // it needs a fresh price rather than a guess against stale data.
        if self.obligations.backed_by(provider).next().is_some() {
            let price = self.fresh_price(now)?;
            let report =
                health::assess(provider, &self.ledger, &self.obligations, &self.registry, price, amount);
            let healthy_after = report.ratio_bps
                >= report.min_ratio_bps + report.warning_buffer_bps;
            if !healthy_after {
                return Err(EngineError::WithdrawalUnsafe {
                    ratio_bps: report.ratio_bps,
                    min_bps: report.min_ratio_bps,
                });
            }
        }

        self.ledger.withdraw(provider, tier, amount, now)?;
        self.accounts.on_withdraw(tier, amount);
        self.settle_tier(tier, now)?;
        self.emit(now, EngineEvent::Withdrawn { provider_id: provider, tier, amount });
        Ok(())
    }

    // ── Classification & reservation ─────────────────────────────────────────

    /// Match a protection request to a tier, reserve collateral across that
    /// tier's providers, and register the obligation, atomically. Any
    /// failure leaves no trace.
    pub fn classify_and_reserve(
        &mut self,
        request: ProtectionRequest,
        now: Timestamp,
    ) -> Result<ObligationId, EngineError> {
        if request.protected_amount == 0 || request.protected_value == 0 || request.duration_secs == 0
        {
            return Err(EngineError::ZeroAmount);
        }
        let price = self.fresh_price(now)?;

        let protected_value_bps = mul_div(request.protected_value, BPS_DENOM, price);
        let tier = self
            .registry
            .classify(protected_value_bps, request.duration_secs)?
            .clone();

        let required = request.policy_type.required_collateral(
            request.protected_amount,
            request.protected_value,
            price,
        );
        if required == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let shares = self.apportion_collateral(tier.name, required)?;

        let premium = self.premium_calc.quote(
            &tier,
            request.protected_value,
            request.protected_amount,
            request.duration_secs,
            request.policy_type,
        )?;

        // External identity first: if the registry refuses, nothing here
        // has moved yet.
        let id = self.policy_registry.create_obligation(
            request.owner,
            request.policy_type,
            request.protected_value,
            request.protected_amount,
            premium,
            now,
            now.offset(request.duration_secs),
        )?;

        // Lock the shares; roll back on any mid-flight refusal so a partial
        // reservation is never observable.
        let mut locked_so_far: Vec<(ProviderId, u64)> = Vec::new();
        for &(p, share) in &shares {
            match self.ledger.lock(p, tier.name, share, now) {
                Ok(()) => locked_so_far.push((p, share)),
                Err(e) => {
                    for &(q, s) in &locked_so_far {
                        let _ = self.ledger.unlock(q, tier.name, s, now);
                    }
                    return Err(e);
                }
            }
        }
        self.accounts.on_lock(tier.name, required);
        self.accounts.on_obligation_opened(tier.name);

        let backers = shares
            .iter()
            .map(|&(p, share)| BackerShare { backer: Backer::Provider(p), locked: share })
            .collect();
        self.obligations.insert(ProtectionObligation {
            id,
            owner: request.owner,
            policy_type: request.policy_type,
            protected_value: request.protected_value,
            protected_amount: request.protected_amount,
            premium,
            tier: tier.name,
            backers,
            created_at: now,
            expires_at: now.offset(request.duration_secs),
            status: ObligationStatus::Active,
        });

        self.settle_tier(tier.name, now)?;
        info!(
            "reserved {required} sats in {:?} for obligation {id:?} across {} providers",
            tier.name,
            shares.len()
        );
        self.emit(now, EngineEvent::ObligationReserved {
            obligation_id: id,
            owner: request.owner,
            tier: tier.name,
            required_collateral: required,
            backer_count: shares.len(),
        });
        Ok(id)
    }

    /// Split `required` sats across the tier's non-halted providers,
    /// pro-rata by free capital, largest-remainder rounding so the shares
    /// sum exactly. Errs when free capital cannot cover the requirement.
    fn apportion_collateral(
        &self,
        tier: TierName,
        required: u64,
    ) -> Result<Vec<(ProviderId, u64)>, EngineError> {
        let mut positions: Vec<(ProviderId, u64)> = self
            .ledger
            .positions_in_tier(tier)
            .filter(|p| p.available() > 0 && !self.ledger.is_halted(p.provider_id))
            .map(|p| (p.provider_id, p.available()))
            .collect();
        positions.sort_unstable_by_key(|(id, _)| *id);
        let total: u64 = positions.iter().map(|(_, a)| a).sum();
        if total < required {
            return Err(EngineError::InsufficientTierCapital {
                tier,
                needed: required,
                available: total,
            });
        }

        let mut shares: Vec<(ProviderId, u64)> = Vec::with_capacity(positions.len());
        let mut remainders: Vec<(u128, ProviderId, usize)> = Vec::with_capacity(positions.len());
        let mut allocated = 0u64;
        for (i, &(p, avail)) in positions.iter().enumerate() {
            let exact = required as u128 * avail as u128;
            let share = (exact / total as u128) as u64;
            remainders.push((exact % total as u128, p, i));
            shares.push((p, share));
            allocated += share;
        }
        // Hand the leftover sats to the largest remainders, provider id as
        // the deterministic tie-break.
        let mut leftover = required - allocated;
        remainders.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for &(_, _, idx) in remainders.iter() {
            if leftover == 0 {
                break;
            }
            shares[idx].1 += 1;
            leftover -= 1;
        }
        shares.retain(|&(_, s)| s > 0);
        Ok(shares)
    }

    // ── Premium settlement ───────────────────────────────────────────────────

    /// Distribute an externally collected premium for `tier`. The split is
    /// platform fee off the top, the rest pro-rata to the tier's providers
    /// by deposited capital right now, residual carried to the next round.
    pub fn distribute_premium(
        &mut self,
        tier: TierName,
        amount: u64,
        now: Timestamp,
    ) -> Result<Distribution, EngineError> {
        self.registry.get(tier)?;
        let dist = self.premiums.distribute(tier, amount, &self.ledger)?;
        for &(p, share) in &dist.shares {
            self.ledger.credit_yield(p, tier, share, now)?;
        }
        self.emit(now, EngineEvent::PremiumDistributed {
            tier,
            amount,
            platform_fee: dist.platform_fee,
            credited: dist.credited(),
            carry: dist.carry,
        });
        Ok(dist)
    }

    // ── Health ───────────────────────────────────────────────────────────────

    pub fn get_health(
        &mut self,
        provider: ProviderId,
        now: Timestamp,
    ) -> Result<HealthReport, EngineError> {
        if self.ledger.positions_of(provider).next().is_none() {
            return Err(EngineError::UnknownProvider(provider));
        }
        let (price, _stale) = self
            .monitoring_price(now)
            .ok_or(EngineError::PriceUnavailable)?;
        Ok(health::assess(provider, &self.ledger, &self.obligations, &self.registry, price, 0))
    }

    // ── The tick ─────────────────────────────────────────────────────────────

    /// The periodic driver: expire due obligations, sweep every provider's
    /// health, move margin calls, and liquidate overdue unhealthy calls.
    /// Runs on every price update; a degraded feed falls back to the last
    /// good price (flagged) and keeps honoring existing obligations while
    /// new ones are refused elsewhere.
    pub fn on_price_tick(&mut self, now: Timestamp) -> Result<TickSummary, EngineError> {
        let (price, stale) = self
            .monitoring_price(now)
            .ok_or(EngineError::PriceUnavailable)?;

        let mut expired = 0;
        for id in self.obligations.due(now) {
            match self.settle_obligation(id, SettlementOutcome::Expired, now) {
                Ok(()) => expired += 1,
                Err(e) => error!("auto-expiry of {id:?} failed: {e}"),
            }
        }

        let providers = self.ledger.providers();
        let reports = health::sweep(&providers, &self.ledger, &self.obligations, &self.registry, price);

        let mut calls_issued = 0;
        for report in &reports {
            let transition = self.margin_calls.on_report(
                report,
                now,
                self.config.warning_grace_secs,
                self.config.emergency_grace_secs,
            );
            match transition {
                Some(MarginTransition::Issued(call)) => {
                    calls_issued += 1;
                    warn!(
                        "margin call on {:?}: ratio {} bps < {} bps, deadline {:?}",
                        call.provider_id, call.current_ratio_bps, call.min_ratio_bps, call.deadline
                    );
                    self.emit(now, EngineEvent::MarginCallIssued {
                        provider_id: call.provider_id,
                        severity: call.severity,
                        ratio_bps: call.current_ratio_bps,
                        min_ratio_bps: call.min_ratio_bps,
                        deficit: call.deficit,
                        deadline: call.deadline,
                    });
                }
                Some(MarginTransition::Refreshed { call, escalated }) => {
                    if escalated {
                        warn!("margin call on {:?} escalated, deadline {:?}", call.provider_id, call.deadline);
                    }
                    self.emit(now, EngineEvent::MarginCallRefreshed {
                        provider_id: call.provider_id,
                        severity: call.severity,
                        ratio_bps: call.current_ratio_bps,
                        deficit: call.deficit,
                        deadline: call.deadline,
                    });
                }
                Some(MarginTransition::Recovered(call)) => {
                    self.emit(now, EngineEvent::MarginCallResolved {
                        provider_id: call.provider_id,
                        method: ResolutionKind::MarketRecovery,
                        ratio_bps: call.current_ratio_bps,
                    });
                }
                None => {}
            }
        }

        // Deadline scan. Liquidation is gated on the ratio still being under
        // the minimum at this tick's price, per the fresh sweep above.
        let mut liquidated = Vec::new();
        for provider in self.margin_calls.overdue(now) {
            let still_under = reports
                .iter()
                .find(|r| r.provider_id == provider)
                .map(|r| r.ratio_bps < r.min_ratio_bps)
                .unwrap_or(false);
            if !still_under {
                continue;
            }
            match self.execute_liquidation(provider, price, stale, now) {
                Ok(()) => liquidated.push(provider),
                Err(e) if e.class() == crate::error::ErrorClass::ExternalDependency => {
                    // Collaborator refused; nothing moved. Next tick retries.
                    warn!("liquidation of {provider:?} deferred: {e}");
                }
                Err(e) => {
                    error!("liquidation of {provider:?} failed mid-commit: {e}; halting provider");
                    self.ledger.halt_provider(provider);
                    self.emit(now, EngineEvent::ProviderHalted { provider_id: provider });
                }
            }
        }

        Ok(TickSummary {
            price,
            price_stale: stale,
            providers_swept: providers.len(),
            calls_issued,
            liquidated,
            obligations_expired: expired,
        })
    }

    // ── Margin call resolution ───────────────────────────────────────────────

    /// Provider-initiated resolution. The chosen action is applied, health
    /// recomputed at a fresh price, and the call resolved only if the ratio
    /// clears the tier minimum; otherwise the action sticks but the call
    /// stays active with a refreshed deficit.
    pub fn resolve_margin_call(
        &mut self,
        provider: ProviderId,
        method: ResolutionMethod,
        now: Timestamp,
    ) -> Result<MarginCall, EngineError> {
        if !self.margin_calls.has_active(provider) {
            return Err(EngineError::NoActiveMarginCall(provider));
        }
        let price = self.fresh_price(now)?;

        match method {
            ResolutionMethod::TopUp { tier, amount } => {
                self.deposit(provider, tier, amount, now)?;
            }
            ResolutionMethod::MigrateTier { from, to } => {
                let source = self.registry.get(from)?.clone();
                let target = self.registry.get(to)?.clone();
                if !target.active {
                    return Err(EngineError::TierInactive(to));
                }
                if target.min_collateral_ratio_bps >= source.min_collateral_ratio_bps {
                    return Err(EngineError::MigrationNotLenient(to));
                }
                let (deposited, locked) = self.ledger.migrate(provider, from, to, now)?;
                self.accounts.on_migrate(from, to, deposited, locked);
                self.settle_tier(from, now)?;
                self.settle_tier(to, now)?;
                self.emit(now, EngineEvent::PositionMigrated {
                    provider_id: provider,
                    from,
                    to,
                    deposited,
                    locked,
                });
            }
            ResolutionMethod::SelfLiquidate { fraction_bps } => {
                if !(LIQUIDATION_FRACTION_MIN_BPS..=LIQUIDATION_FRACTION_MAX_BPS)
                    .contains(&fraction_bps)
                {
                    return Err(EngineError::FractionOutOfBounds(fraction_bps));
                }
                let plan =
                    liquidation::plan(provider, &self.ledger, &self.obligations, fraction_bps);
                self.apply_liquidation_plan(&plan, price, false, now)?;
            }
        }

        let report =
            health::assess(provider, &self.ledger, &self.obligations, &self.registry, price, 0);
        if report.required_value > 0 && report.ratio_bps < report.min_ratio_bps {
            // Action applied but insufficient: refresh the call in place.
            self.margin_calls.on_report(
                &report,
                now,
                self.config.warning_grace_secs,
                self.config.emergency_grace_secs,
            );
            return Err(EngineError::ResolutionInsufficient {
                ratio_bps: report.ratio_bps,
                min_bps: report.min_ratio_bps,
            });
        }

        let call = self.margin_calls.resolve(provider, report.ratio_bps)?;
        info!("margin call on {provider:?} resolved via {:?}", method.kind());
        self.emit(now, EngineEvent::MarginCallResolved {
            provider_id: provider,
            method: method.kind(),
            ratio_bps: report.ratio_bps,
        });
        Ok(call)
    }

    // ── Liquidation ──────────────────────────────────────────────────────────

    /// Forced path: plan at the configured fraction, then hand off and commit.
    fn execute_liquidation(
        &mut self,
        provider: ProviderId,
        price: u64,
        stale: bool,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let plan = liquidation::plan(
            provider,
            &self.ledger,
            &self.obligations,
            self.config.liquidation_fraction_bps,
        );
        self.apply_liquidation_plan(&plan, price, stale, now)?;
        self.margin_calls.mark_liquidated(provider)?;
        Ok(())
    }

    /// Shared commit for forced and voluntary passes. External collaborators
    /// are consulted first; only after both accept does any ledger move, so
    /// a refusal aborts with state untouched.
    fn apply_liquidation_plan(
        &mut self,
        plan: &LiquidationPlan,
        price: u64,
        stale: bool,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let ids = plan.obligation_ids();
        self.insurance_fund
            .receive_transferred_obligations(plan.provider_id, &ids)?;
        for &id in &ids {
            self.policy_registry.mark_transferred(id)?;
        }

        for &(id, amount) in &plan.transfers {
            let ob = self.obligations.get_mut(id)?;
            ob.transfer_to_fund(plan.provider_id, amount)?;
            if ob.status == ObligationStatus::Active {
                let tier = ob.tier;
                ob.close(ObligationStatus::Transferred)?;
                self.accounts.on_obligation_closed(tier);
            }
            self.emit(now, EngineEvent::ObligationTransferred {
                obligation_id: id,
                provider_id: plan.provider_id,
                amount,
            });
        }
        for &(tier, amount) in &plan.seizures {
            self.ledger.seize(plan.provider_id, tier, amount, now)?;
            self.accounts.on_seize(tier, amount);
            self.settle_tier(tier, now)?;
        }

        let record = self.liquidations.append(plan, price, now);
        info!(
            "liquidated {} sats of {:?} ({} obligations) at price {price}",
            record.liquidated_amount,
            plan.provider_id,
            record.obligations_transferred.len()
        );
        self.emit(now, EngineEvent::LiquidationExecuted {
            liquidation_id: record.id,
            provider_id: plan.provider_id,
            liquidated_amount: record.liquidated_amount,
            remaining_amount: record.remaining_amount,
            liquidation_price: price,
            obligations_transferred: record.obligations_transferred.len(),
            price_stale: stale,
        });
        Ok(())
    }

    // ── Obligation settlement ────────────────────────────────────────────────

    /// Close out an obligation's collateral. Expiry and cancellation unlock
    /// backer shares in place; exercise seizes them, since the payout leaves
    /// the pool. The external registry is informed before anything moves.
    pub fn settle_obligation(
        &mut self,
        id: ObligationId,
        outcome: SettlementOutcome,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let ob = self.obligations.get(id)?;
        if !ob.is_live() {
            return Err(EngineError::ObligationNotActive(id));
        }
        let was_active = ob.status == ObligationStatus::Active;
        let tier = ob.tier;
        let provider_shares: Vec<(ProviderId, u64)> = ob
            .backers
            .iter()
            .filter_map(|b| match b.backer {
                Backer::Provider(p) if b.locked > 0 => Some((p, b.locked)),
                _ => None,
            })
            .collect();

        match outcome {
            SettlementOutcome::Exercised => self.policy_registry.mark_exercised(id)?,
            SettlementOutcome::Expired => self.policy_registry.mark_expired(id)?,
            SettlementOutcome::Canceled => self.policy_registry.mark_canceled(id)?,
        }

        let mut moved_total = 0u64;
        for (provider, share) in provider_shares {
            moved_total += share;
            // The lock may have migrated tiers with the provider; release it
            // wherever it now sits, starting from the obligation's own tier.
            let mut remaining = share;
            let mut tiers: Vec<TierName> = self
                .ledger
                .positions_of(provider)
                .filter(|p| p.locked > 0)
                .map(|p| p.tier)
                .collect();
            tiers.sort_unstable();
            tiers.retain(|&t| t != tier);
            tiers.insert(0, tier);
            for t in tiers {
                if remaining == 0 {
                    break;
                }
                let held = self
                    .ledger
                    .position(provider, t)
                    .map(|p| p.locked)
                    .unwrap_or(0);
                let take = remaining.min(held);
                if take == 0 {
                    continue;
                }
                match outcome {
                    SettlementOutcome::Exercised => {
                        self.ledger.seize(provider, t, take, now)?;
                        self.accounts.on_seize(t, take);
                    }
                    SettlementOutcome::Expired | SettlementOutcome::Canceled => {
                        self.ledger.unlock(provider, t, take, now)?;
                        self.accounts.on_unlock(t, take);
                    }
                }
                self.settle_tier(t, now)?;
                remaining -= take;
            }
        }

        let ob = self.obligations.get_mut(id)?;
        // Zero every share, the fund's included: settlement ends the
        // obligation's claim on anyone's collateral.
        for b in &mut ob.backers {
            b.locked = 0;
        }
        if was_active {
            let status = match outcome {
                SettlementOutcome::Exercised => ObligationStatus::Exercised,
                SettlementOutcome::Expired => ObligationStatus::Expired,
                SettlementOutcome::Canceled => ObligationStatus::Canceled,
            };
            ob.close(status)?;
            self.accounts.on_obligation_closed(tier);
        }

        self.emit(now, match outcome {
            SettlementOutcome::Exercised => EngineEvent::ObligationExercised { obligation_id: id, paid_out: moved_total },
            SettlementOutcome::Expired => EngineEvent::ObligationExpired { obligation_id: id, released: moved_total },
            SettlementOutcome::Canceled => EngineEvent::ObligationCanceled { obligation_id: id, released: moved_total },
        });
        Ok(())
    }
}
