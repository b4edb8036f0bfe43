use std::collections::HashMap;

use serde::Serialize;

use crate::error::EngineError;
use crate::tiers::TierName;
use crate::types::{AccountId, ObligationId, ProviderId, Timestamp, mul_div};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyType {
    /// Downside protection: pays when price falls below the protected value.
    Put,
    /// Upside protection: pays when price rises above the protected value.
    Call,
}

impl PolicyType {
    /// Collateral that fully covers the obligation, in sats, at `price`.
    /// A PUT paying `amount × strike` cents needs `amount × strike / price`
    /// sats at the current price; a CALL delivers the asset itself.
    pub fn required_collateral(self, protected_amount: u64, protected_value: u64, price: u64) -> u64 {
        match self {
            PolicyType::Put => mul_div(protected_amount, protected_value, price),
            PolicyType::Call => protected_amount,
        }
    }
}

/// One-way out of `Active`; every other state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObligationStatus {
    Active,
    Exercised,
    Expired,
    Canceled,
    Transferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Backer {
    Provider(ProviderId),
    InsuranceFund,
}

/// A counterparty's slice of the collateral backing one obligation, in sats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackerShare {
    pub backer: Backer,
    pub locked: u64,
}

/// The collateral-relevant view of a protection policy. The obligation id
/// is issued by the external policy registry; the engine owns the backer
/// set and the lock amounts, nothing else about the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectionObligation {
    pub id: ObligationId,
    pub owner: AccountId,
    pub policy_type: PolicyType,
    /// Strike, in cents per BTC.
    pub protected_value: u64,
    /// Covered quantity, in sats.
    pub protected_amount: u64,
    /// Premium paid at creation, in sats. Recorded for audit only.
    pub premium: u64,
    pub tier: TierName,
    pub backers: Vec<BackerShare>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: ObligationStatus,
}

impl ProtectionObligation {
    pub fn total_locked(&self) -> u64 {
        self.backers.iter().map(|b| b.locked).sum()
    }

    pub fn provider_share(&self, provider: ProviderId) -> u64 {
        self.backers
            .iter()
            .filter(|b| b.backer == Backer::Provider(provider))
            .map(|b| b.locked)
            .sum()
    }

    /// Collateral requirement recomputed at the given price, in sats.
    pub fn required_collateral_at(&self, price: u64) -> u64 {
        self.policy_type
            .required_collateral(self.protected_amount, self.protected_value, price)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, ObligationStatus::Active | ObligationStatus::Transferred)
    }

    /// Leave `Active` for a terminal state.
    pub fn close(&mut self, to: ObligationStatus) -> Result<(), EngineError> {
        if self.status != ObligationStatus::Active {
            return Err(EngineError::ObligationNotActive(self.id));
        }
        self.status = to;
        Ok(())
    }

    /// Shrink a provider's share by `amount` and grow the insurance fund's
    /// share by the same amount (liquidation transfer). Shares of other
    /// backers are untouched.
    pub fn transfer_to_fund(&mut self, provider: ProviderId, amount: u64) -> Result<(), EngineError> {
        let share = self
            .backers
            .iter_mut()
            .find(|b| b.backer == Backer::Provider(provider))
            .ok_or(EngineError::UnknownProvider(provider))?;
        if amount > share.locked {
            return Err(EngineError::LockedExceedsDeposited {
                provider,
                locked: share.locked,
                deposited: amount,
            });
        }
        share.locked -= amount;
        match self
            .backers
            .iter_mut()
            .find(|b| b.backer == Backer::InsuranceFund)
        {
            Some(fund) => fund.locked += amount,
            None => self.backers.push(BackerShare { backer: Backer::InsuranceFund, locked: amount }),
        }
        Ok(())
    }
}

/// Engine-owned index of obligations it has reserved collateral for.
#[derive(Debug, Default)]
pub struct ObligationBook {
    obligations: HashMap<ObligationId, ProtectionObligation>,
}

impl ObligationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ob: ProtectionObligation) {
        self.obligations.insert(ob.id, ob);
    }

    pub fn get(&self, id: ObligationId) -> Result<&ProtectionObligation, EngineError> {
        self.obligations
            .get(&id)
            .ok_or(EngineError::UnknownObligation(id))
    }

    pub fn get_mut(&mut self, id: ObligationId) -> Result<&mut ProtectionObligation, EngineError> {
        self.obligations
            .get_mut(&id)
            .ok_or(EngineError::UnknownObligation(id))
    }

    pub fn live(&self) -> impl Iterator<Item = &ProtectionObligation> {
        self.obligations.values().filter(|o| o.is_live())
    }

    /// Live obligations in which this provider still holds a share.
    pub fn backed_by(&self, provider: ProviderId) -> impl Iterator<Item = &ProtectionObligation> {
        self.live()
            .filter(move |o| o.provider_share(provider) > 0)
    }

    /// Ids of live obligations whose expiry has passed, sorted for
    /// deterministic processing order. Settled obligations have zeroed
    /// backer shares and drop out.
    pub fn due(&self, now: Timestamp) -> Vec<ObligationId> {
        let mut ids: Vec<ObligationId> = self
            .live()
            .filter(|o| now > o.expires_at && o.total_locked() > 0)
            .map(|o| o.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
