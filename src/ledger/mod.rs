use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::access::{AccessControl, AccessError, ProfileRegistry};
use crate::address::Address;
use crate::currency::{Currency, TransferError};

pub type ProfileId = u64;
pub type PubId = u64;
pub type Amount = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Unauthorized(#[from] AccessError),
    #[error("arity mismatch: {profiles} profiles, {rewards} rewards, {multipliers} multipliers")]
    ArityMismatch {
        profiles: usize,
        rewards: usize,
        multipliers: usize,
    },
    #[error("profile {profile_id} cannot claim {requested}: balance {balance:?}")]
    InsufficientBalance {
        profile_id: ProfileId,
        requested: Amount,
        balance: RewardBalance,
    },
    #[error("ledger holds {holdings}, claim needs {requested}")]
    InsufficientLedgerFunds { requested: Amount, holdings: Amount },
    #[error("reward overflow for profile {profile_id}")]
    Overflow { profile_id: ProfileId },
    #[error("claim transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Per-category amounts the relayer credits for one profile.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeedReward {
    pub sun: Amount,
    pub rain: Amount,
    pub soil: Amount,
}

impl SeedReward {
    pub fn new(sun: Amount, rain: Amount, soil: Amount) -> Self {
        Self { sun, rain, soil }
    }

    pub fn scaled(&self, multiplier: u64) -> Option<SeedReward> {
        Some(SeedReward {
            sun: self.sun.checked_mul(multiplier)?,
            rain: self.rain.checked_mul(multiplier)?,
            soil: self.soil.checked_mul(multiplier)?,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RewardBalance {
    pub profile_id: ProfileId,
    pub sun: Amount,
    pub rain: Amount,
    pub soil: Amount,
}

impl RewardBalance {
    pub fn zero(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            ..Default::default()
        }
    }

    /// The largest amount a claim can take, since every claim debits all
    /// three categories equally.
    pub fn claimable(&self) -> Amount {
        self.sun.min(self.rain).min(self.soil)
    }

    pub fn is_zero(&self) -> bool {
        self.sun == 0 && self.rain == 0 && self.soil == 0
    }

    pub fn checked_credit(&self, reward: &SeedReward) -> Option<RewardBalance> {
        Some(RewardBalance {
            profile_id: self.profile_id,
            sun: self.sun.checked_add(reward.sun)?,
            rain: self.rain.checked_add(reward.rain)?,
            soil: self.soil.checked_add(reward.soil)?,
        })
    }

    pub fn checked_debit(&self, amount: Amount) -> Option<RewardBalance> {
        Some(RewardBalance {
            profile_id: self.profile_id,
            sun: self.sun.checked_sub(amount)?,
            rain: self.rain.checked_sub(amount)?,
            soil: self.soil.checked_sub(amount)?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub holder: Address,
    pub balances: BTreeMap<ProfileId, RewardBalance>,
    pub events: Vec<LedgerEvent>,
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    RewardCredited {
        profile_id: ProfileId,
        multiplier: u64,
        sun: Amount,
        rain: Amount,
        soil: Amount,
        timestamp: u64,
    },
    RewardClaimed {
        profile_id: ProfileId,
        recipient: Address,
        amount: Amount,
        timestamp: u64,
    },
}

/// A validated change waiting for the commit point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerMutation {
    Credit {
        profile_id: ProfileId,
        reward: SeedReward,
        multiplier: u64,
    },
    Debit {
        profile_id: ProfileId,
        recipient: Address,
        amount: Amount,
    },
}

/// Mutations plus the balances they produce, computed before anything is
/// written.
#[derive(Debug, Default)]
struct StagedUpdate {
    mutations: Vec<LedgerMutation>,
    balances: BTreeMap<ProfileId, RewardBalance>,
}

#[derive(Clone, Debug)]
pub struct RewardLedger {
    holder: Address,
    access: AccessControl,
    meta: SnapshotMetadata,
    balances: BTreeMap<ProfileId, RewardBalance>,
    events: Vec<LedgerEvent>,
}

impl RewardLedger {
    /// `holder` is the account whose currency backs claims.
    pub fn new(holder: Address, access: AccessControl) -> Self {
        Self {
            holder,
            access,
            meta: SnapshotMetadata::default(),
            balances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn holder(&self) -> Address {
        self.holder
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn set_relayer(&mut self, caller: &Address, relayer: Address) -> Result<(), LedgerError> {
        self.access.set_relayer(caller, relayer)?;
        Ok(())
    }

    pub fn meta(&self) -> &SnapshotMetadata {
        &self.meta
    }

    pub fn balance(&self, profile_id: ProfileId) -> RewardBalance {
        self.balances
            .get(&profile_id)
            .copied()
            .unwrap_or_else(|| RewardBalance::zero(profile_id))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sum of what every profile could claim right now.
    pub fn claimable_total(&self) -> Amount {
        self.balances
            .values()
            .fold(0, |acc: Amount, balance| acc.saturating_add(balance.claimable()))
    }

    /// Credits `rewards[i] * multipliers[i]` to `profile_ids[i]`. The whole
    /// batch applies or nothing does.
    pub fn credit_batch(
        &mut self,
        caller: &Address,
        profile_ids: &[ProfileId],
        rewards: &[SeedReward],
        multipliers: &[u64],
        timestamp: u64,
    ) -> Result<(), LedgerError> {
        self.access.require_relayer(caller)?;
        if profile_ids.len() != rewards.len() || rewards.len() != multipliers.len() {
            warn!(
                profiles = profile_ids.len(),
                rewards = rewards.len(),
                multipliers = multipliers.len(),
                "rejected credit batch with mismatched arity"
            );
            return Err(LedgerError::ArityMismatch {
                profiles: profile_ids.len(),
                rewards: rewards.len(),
                multipliers: multipliers.len(),
            });
        }

        let mut staged = StagedUpdate::default();
        let entries = profile_ids.iter().zip(rewards).zip(multipliers);
        for ((profile_id, reward), multiplier) in entries {
            let overflow = || LedgerError::Overflow {
                profile_id: *profile_id,
            };
            let scaled = reward.scaled(*multiplier).ok_or_else(overflow)?;
            let current = staged
                .balances
                .get(profile_id)
                .copied()
                .unwrap_or_else(|| self.balance(*profile_id));
            let next = current.checked_credit(&scaled).ok_or_else(overflow)?;
            staged.balances.insert(*profile_id, next);
            staged.mutations.push(LedgerMutation::Credit {
                profile_id: *profile_id,
                reward: scaled,
                multiplier: *multiplier,
            });
        }

        let applied = staged.mutations.len();
        self.commit(staged, timestamp);
        info!(entries = applied, height = self.meta.height, "credit batch applied");
        Ok(())
    }

    /// Pays `amount` to the profile's controller and debits it from every
    /// category. The transfer and the debit happen together or not at all.
    pub fn claim<R, C>(
        &mut self,
        caller: &Address,
        profile_id: ProfileId,
        amount: Amount,
        registry: &R,
        currency: &mut C,
        timestamp: u64,
    ) -> Result<(), LedgerError>
    where
        R: ProfileRegistry + ?Sized,
        C: Currency + ?Sized,
    {
        let recipient = self.access.require_controller(caller, profile_id, registry)?;
        let balance = self.balance(profile_id);
        let next = balance
            .checked_debit(amount)
            .ok_or(LedgerError::InsufficientBalance {
                profile_id,
                requested: amount,
                balance,
            })?;
        let holdings = currency.balance_of(&self.holder);
        if holdings < amount {
            warn!(profile_id, amount, holdings, "ledger cannot cover claim");
            return Err(LedgerError::InsufficientLedgerFunds {
                requested: amount,
                holdings,
            });
        }

        currency.transfer(&self.holder, &recipient, amount)?;

        let mut staged = StagedUpdate::default();
        staged.balances.insert(profile_id, next);
        staged.mutations.push(LedgerMutation::Debit {
            profile_id,
            recipient,
            amount,
        });
        self.commit(staged, timestamp);
        info!(profile_id, amount, %recipient, "reward claimed");
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            holder: self.holder,
            balances: self.balances.clone(),
            events: self.events.clone(),
            merkle_root: compute_merkle_root(&self.balances),
        }
    }

    /// Applies staged balances and records events. Rows that end at zero are
    /// dropped so the snapshot root only depends on non-zero balances.
    fn commit(&mut self, staged: StagedUpdate, timestamp: u64) {
        for (profile_id, balance) in staged.balances {
            if balance.is_zero() {
                self.balances.remove(&profile_id);
            } else {
                self.balances.insert(profile_id, balance);
            }
        }
        for mutation in staged.mutations {
            let event = match mutation {
                LedgerMutation::Credit {
                    profile_id,
                    reward,
                    multiplier,
                } => LedgerEvent::RewardCredited {
                    profile_id,
                    multiplier,
                    sun: reward.sun,
                    rain: reward.rain,
                    soil: reward.soil,
                    timestamp,
                },
                LedgerMutation::Debit {
                    profile_id,
                    recipient,
                    amount,
                } => LedgerEvent::RewardClaimed {
                    profile_id,
                    recipient,
                    amount,
                    timestamp,
                },
            };
            self.events.push(event);
        }
        self.meta.height += 1;
        self.meta.timestamp = timestamp;
    }
}

fn compute_merkle_root(balances: &BTreeMap<ProfileId, RewardBalance>) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = balances
        .values()
        .map(|balance| {
            let mut hasher = Sha256::new();
            hasher.update(b"seed");
            hasher.update(balance.profile_id.to_le_bytes());
            hasher.update(balance.sun.to_le_bytes());
            hasher.update(balance.rain.to_le_bytes());
            hasher.update(balance.soil.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"seed-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
