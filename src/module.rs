//! The seed reference module: threads, comment payments and the reward
//! ledger behind one serialized entry point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::access::{AccessControl, AccessError, ProfileRegistry};
use crate::address::Address;
use crate::config::SeedConfig;
use crate::currency::Currency;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::ledger::{
    Amount, LedgerError, LedgerEvent, LedgerSnapshot, ProfileId, PubId, RewardBalance,
    RewardLedger, SeedReward,
};
use crate::tree::{PubKey, PublicationEvent, ThreadRegistry, TreeError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SeedError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Coarse grouping used by callers to decide how to react to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authorization,
    Validation,
    InsufficientFunds,
    Integrity,
    Transfer,
}

fn access_class(err: &AccessError) -> ErrorClass {
    match err {
        AccessError::UnknownProfile { .. } => ErrorClass::Validation,
        _ => ErrorClass::Authorization,
    }
}

impl SeedError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SeedError::Access(err) => access_class(err),
            SeedError::Tree(_) => ErrorClass::Validation,
            SeedError::Ledger(err) => match err {
                LedgerError::Unauthorized(err) => access_class(err),
                LedgerError::ArityMismatch { .. } => ErrorClass::Validation,
                LedgerError::InsufficientBalance { .. }
                | LedgerError::InsufficientLedgerFunds { .. } => ErrorClass::InsufficientFunds,
                LedgerError::Overflow { .. } => ErrorClass::Integrity,
                LedgerError::Transfer(_) => ErrorClass::Transfer,
            },
            SeedError::Gateway(err) => match err {
                GatewayError::MalformedReferenceData(_) | GatewayError::ZeroPayer => {
                    ErrorClass::Validation
                }
                GatewayError::TransferFailed { .. } => ErrorClass::Transfer,
            },
        }
    }

    /// Whether the same call may succeed later with a smaller amount.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::InsufficientFunds
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRequest {
    pub profile_id: ProfileId,
    pub profile_id_pointed: ProfileId,
    pub pub_id_pointed: PubId,
    /// Optional ABI-encoded payer address.
    #[serde(default)]
    pub reference_data: Vec<u8>,
    /// Whether comments on this new comment are charged too.
    #[serde(default)]
    pub with_gateway: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedPublication {
    pub profile_id: ProfileId,
    pub pub_id: PubId,
    pub score: u64,
}

pub struct SeedModule<R, C> {
    config: SeedConfig,
    profiles: R,
    currency: C,
    threads: ThreadRegistry,
    ledger: RewardLedger,
    gateway: PaymentGateway,
    pub_counts: BTreeMap<ProfileId, PubId>,
}

impl<R, C> SeedModule<R, C>
where
    R: ProfileRegistry,
    C: Currency,
{
    pub fn new(config: SeedConfig, profiles: R, currency: C) -> Self {
        let access = AccessControl::new(config.owner, config.relayer);
        Self {
            ledger: RewardLedger::new(config.module_address, access),
            gateway: PaymentGateway::new(config.module_address, config.payment_amount),
            threads: ThreadRegistry::new(),
            pub_counts: BTreeMap::new(),
            config,
            profiles,
            currency,
        }
    }

    pub fn config(&self) -> &SeedConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        self.config.module_address
    }

    pub fn profiles(&self) -> &R {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut R {
        &mut self.profiles
    }

    pub fn currency(&self) -> &C {
        &self.currency
    }

    pub fn currency_mut(&mut self) -> &mut C {
        &mut self.currency
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn ledger(&self) -> &RewardLedger {
        &self.ledger
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    pub fn events(&self) -> &[LedgerEvent] {
        self.ledger.events()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// Number of publications `profile_id` has made so far.
    pub fn pub_count(&self, profile_id: ProfileId) -> PubId {
        self.pub_counts.get(&profile_id).copied().unwrap_or_default()
    }

    pub fn set_relayer(&mut self, caller: &Address, relayer: Address) -> Result<(), SeedError> {
        self.ledger.set_relayer(caller, relayer)?;
        self.config.relayer = relayer;
        Ok(())
    }

    /// Publishes a root post and returns its publication id.
    #[instrument(skip(self))]
    pub fn post(
        &mut self,
        caller: &Address,
        profile_id: ProfileId,
        with_gateway: bool,
    ) -> Result<PubId, SeedError> {
        self.ledger
            .access()
            .require_controller(caller, profile_id, &self.profiles)?;
        let pub_id = self.pub_count(profile_id) + 1;
        self.threads.ingest(PublicationEvent {
            pub_id,
            profile_id,
            profile_id_pointed: 0,
            pub_id_pointed: 0,
        })?;
        self.pub_counts.insert(profile_id, pub_id);
        if with_gateway {
            self.gateway.initialize((profile_id, pub_id));
        }
        info!(profile_id, pub_id, with_gateway, "post created");
        Ok(pub_id)
    }

    /// Publishes a comment. When the pointed publication routes through the
    /// gateway the payment is collected first and a failed payment leaves no
    /// trace of the comment.
    #[instrument(skip(self))]
    pub fn comment(
        &mut self,
        caller: &Address,
        request: &CommentRequest,
    ) -> Result<PubId, SeedError> {
        let commenter = self
            .ledger
            .access()
            .require_controller(caller, request.profile_id, &self.profiles)?;
        let pointed: PubKey = (request.profile_id_pointed, request.pub_id_pointed);
        if !self.threads.contains(pointed.0, pointed.1) {
            return Err(TreeError::PublicationNotFound {
                profile_id: pointed.0,
                pub_id: pointed.1,
            }
            .into());
        }
        let pub_id = self.pub_count(request.profile_id) + 1;

        if self.gateway.is_active(pointed) {
            self.gateway
                .process_comment(&commenter, &request.reference_data, &mut self.currency)?;
        }

        let root = self.threads.ingest(PublicationEvent {
            pub_id,
            profile_id: request.profile_id,
            profile_id_pointed: pointed.0,
            pub_id_pointed: pointed.1,
        })?;
        self.pub_counts.insert(request.profile_id, pub_id);
        if request.with_gateway {
            self.gateway.initialize((request.profile_id, pub_id));
        }
        info!(
            profile_id = request.profile_id,
            pub_id,
            thread_profile = root.0,
            thread_pub = root.1,
            "comment created"
        );
        Ok(pub_id)
    }

    #[instrument(
        skip(self, profile_ids, rewards, multipliers),
        fields(entries = profile_ids.len())
    )]
    pub fn add_seed_rewards(
        &mut self,
        caller: &Address,
        profile_ids: &[ProfileId],
        rewards: &[SeedReward],
        multipliers: &[u64],
        timestamp: u64,
    ) -> Result<(), SeedError> {
        self.ledger
            .credit_batch(caller, profile_ids, rewards, multipliers, timestamp)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn claim(
        &mut self,
        caller: &Address,
        profile_id: ProfileId,
        amount: Amount,
        timestamp: u64,
    ) -> Result<(), SeedError> {
        self.ledger.claim(
            caller,
            profile_id,
            amount,
            &self.profiles,
            &mut self.currency,
            timestamp,
        )?;
        Ok(())
    }

    pub fn reward_of(&self, profile_id: ProfileId) -> RewardBalance {
        self.ledger.balance(profile_id)
    }

    /// Ranks the children of nodes indexed `target_index` inside the thread
    /// rooted at `root`. `k` falls back to the configured ranking width.
    pub fn top_children(
        &self,
        root: PubKey,
        target_index: PubId,
        k: Option<usize>,
    ) -> Result<Vec<RankedPublication>, SeedError> {
        let tree = self
            .threads
            .thread(root)
            .ok_or(TreeError::PublicationNotFound {
                profile_id: root.0,
                pub_id: root.1,
            })?;
        let width = k.unwrap_or(self.config.ranking_width);
        Ok(tree
            .top_children_by_engagement(target_index, width)
            .into_iter()
            .map(|(node, score)| RankedPublication {
                profile_id: node.value.profile_id,
                pub_id: node.index,
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::access::ProfileDirectory;
    use crate::currency::MemoryCurrency;

    const OWNER: u64 = 1;
    const RELAYER: u64 = 2;
    const MODULE: u64 = 3;
    const PAYMENT: Amount = 10;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    /// Two profiles controlled by addresses 100 and 200.
    fn module() -> SeedModule<ProfileDirectory, MemoryCurrency> {
        let mut profiles = ProfileDirectory::new();
        profiles.register(addr(100));
        profiles.register(addr(200));
        let mut config = SeedConfig::new(addr(OWNER), addr(RELAYER), addr(MODULE));
        config.payment_amount = PAYMENT;
        SeedModule::new(config, profiles, MemoryCurrency::new())
    }

    fn reply(profile_id: ProfileId, to: PubKey) -> CommentRequest {
        CommentRequest {
            profile_id,
            profile_id_pointed: to.0,
            pub_id_pointed: to.1,
            reference_data: Vec::new(),
            with_gateway: false,
        }
    }

    #[test]
    fn publication_ids_are_per_profile() {
        let mut seed = module();
        assert_eq!(seed.post(&addr(100), 1, false).unwrap(), 1);
        assert_eq!(seed.post(&addr(100), 1, false).unwrap(), 2);
        assert_eq!(seed.comment(&addr(200), &reply(2, (1, 1))).unwrap(), 1);
        assert_eq!(seed.comment(&addr(100), &reply(1, (2, 1))).unwrap(), 3);
        assert_eq!(seed.threads().thread((1, 1)).unwrap().len(), 3);
        assert_eq!(seed.pub_count(2), 1);
    }

    #[test]
    fn unpaid_comment_leaves_no_trace() {
        let mut seed = module();
        seed.post(&addr(100), 1, true).unwrap();
        let err = seed.comment(&addr(200), &reply(2, (1, 1))).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transfer);
        assert_eq!(seed.pub_count(2), 0);
        assert!(!seed.threads().contains(2, 1));
        assert_eq!(seed.threads().thread((1, 1)).unwrap().len(), 1);
    }

    #[test]
    fn paid_comment_moves_payment_to_module() {
        let mut seed = module();
        seed.post(&addr(100), 1, true).unwrap();
        seed.currency_mut().mint(&addr(200), PAYMENT * 2).unwrap();
        seed.currency_mut().approve(&addr(200), &addr(MODULE), PAYMENT);
        seed.comment(&addr(200), &reply(2, (1, 1))).unwrap();
        assert_eq!(seed.currency().balance_of(&addr(200)), PAYMENT);
        assert_eq!(seed.currency().balance_of(&addr(MODULE)), PAYMENT);
    }

    #[test]
    fn ungated_publication_is_free() {
        let mut seed = module();
        seed.post(&addr(100), 1, false).unwrap();
        seed.comment(&addr(200), &reply(2, (1, 1))).unwrap();
        assert_eq!(seed.currency().balance_of(&addr(MODULE)), 0);
    }

    #[test]
    fn comment_checks_controller_and_target() {
        let mut seed = module();
        seed.post(&addr(100), 1, false).unwrap();
        let err = seed.comment(&addr(100), &reply(2, (1, 1))).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authorization);
        let err = seed.comment(&addr(200), &reply(2, (1, 9))).unwrap_err();
        assert_eq!(
            err,
            SeedError::Tree(TreeError::PublicationNotFound {
                profile_id: 1,
                pub_id: 9
            })
        );
        let err = seed.post(&addr(100), 7, false).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn error_classes_follow_taxonomy() {
        let mut seed = module();
        let err = seed
            .add_seed_rewards(&addr(100), &[1], &[SeedReward::new(1, 1, 1)], &[1], 1)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authorization);

        let err = seed
            .add_seed_rewards(&addr(RELAYER), &[1], &[], &[1], 1)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);

        let err = seed
            .add_seed_rewards(&addr(RELAYER), &[1], &[SeedReward::new(u64::MAX, 0, 0)], &[2], 1)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Integrity);

        seed.add_seed_rewards(&addr(RELAYER), &[1], &[SeedReward::new(5, 5, 5)], &[1], 1)
            .unwrap();
        let err = seed.claim(&addr(100), 1, 6, 2).unwrap_err();
        assert_eq!(err.class(), ErrorClass::InsufficientFunds);
        assert!(err.is_retryable());
        let err = seed.claim(&addr(100), 1, 5, 2).unwrap_err();
        assert_eq!(err.class(), ErrorClass::InsufficientFunds);
    }

    #[test]
    fn relayer_can_be_rotated_by_owner() {
        let mut seed = module();
        assert!(seed.set_relayer(&addr(RELAYER), addr(9)).is_err());
        seed.set_relayer(&addr(OWNER), addr(9)).unwrap();
        assert_eq!(seed.config().relayer, addr(9));
        assert!(seed
            .add_seed_rewards(&addr(RELAYER), &[1], &[SeedReward::new(1, 1, 1)], &[1], 1)
            .is_err());
        seed.add_seed_rewards(&addr(9), &[1], &[SeedReward::new(1, 1, 1)], &[1], 1)
            .unwrap();
        assert_eq!(seed.reward_of(1).sun, 1);
    }

    #[test]
    fn module_account_backs_gateway_and_ledger() {
        let seed = module();
        assert_eq!(seed.address(), addr(MODULE));
        assert_eq!(seed.gateway().holder(), addr(MODULE));
        assert_eq!(seed.ledger().holder(), addr(MODULE));
        assert_eq!(seed.gateway().payment_amount(), PAYMENT);
        assert_eq!(seed.ledger().access().owner(), addr(OWNER));
        assert_eq!(seed.profiles().len(), 2);
    }

    #[test]
    fn handed_over_profile_claims_to_new_controller() {
        let mut seed = module();
        seed.currency_mut().mint(&addr(MODULE), 50).unwrap();
        seed.add_seed_rewards(&addr(RELAYER), &[1], &[SeedReward::new(8, 8, 8)], &[1], 1)
            .unwrap();
        seed.profiles_mut().transfer(1, addr(300)).unwrap();

        let err = seed.claim(&addr(100), 1, 8, 2).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Authorization);
        seed.claim(&addr(300), 1, 8, 3).unwrap();
        assert_eq!(seed.currency().balance_of(&addr(300)), 8);
        assert!(seed.post(&addr(100), 1, false).is_err());
        assert_eq!(seed.post(&addr(300), 1, false).unwrap(), 1);
    }

    #[test]
    fn ranking_uses_configured_width() {
        let mut seed = module();
        seed.post(&addr(100), 1, false).unwrap();
        for _ in 0..4 {
            seed.comment(&addr(200), &reply(2, (1, 1))).unwrap();
        }
        seed.comment(&addr(100), &reply(1, (2, 3))).unwrap();

        let ranked = seed.top_children((1, 1), 1, None).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(
            ranked[0],
            RankedPublication {
                profile_id: 2,
                pub_id: 3,
                score: 1
            }
        );
        assert_eq!(seed.top_children((1, 1), 1, Some(10)).unwrap().len(), 4);
        assert!(seed.top_children((5, 5), 1, None).is_err());
    }
}
