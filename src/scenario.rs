//! JSON scenario files: a set of profiles plus a list of steps replayed
//! against a fresh [`SeedModule`].

use std::{fs, path::Path};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::access::ProfileDirectory;
use crate::address::Address;
use crate::config::{ConfigError, SeedConfig};
use crate::currency::{Currency, MemoryCurrency, TransferError};
use crate::ledger::{Amount, LedgerSnapshot, ProfileId, PubId, SeedReward};
use crate::module::{CommentRequest, ErrorClass, SeedError, SeedModule};

pub type ScenarioModule = SeedModule<ProfileDirectory, MemoryCurrency>;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("scenario has no config and none was supplied")]
    MissingConfig,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReferenceDataError {
    #[error("bad reference hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("bad reference base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Reference data as written in a scenario: raw hex, base64, or a payer
/// address to ABI-encode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ReferenceData {
    Hex { hex: String },
    B64 { b64: String },
    Payer { payer: Address },
}

impl ReferenceData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReferenceDataError> {
        let bytes = match self {
            ReferenceData::Hex { hex } => hex::decode(hex.trim().trim_start_matches("0x"))?,
            ReferenceData::B64 { b64 } => general_purpose::STANDARD.decode(b64.trim())?,
            ReferenceData::Payer { payer } => payer.to_abi_word().to_vec(),
        };
        Ok(bytes)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Mint {
        to: Address,
        amount: Amount,
    },
    /// Grants the module an allowance over `owner`'s balance.
    Approve {
        owner: Address,
        amount: Amount,
    },
    Post {
        caller: Address,
        profile_id: ProfileId,
        #[serde(default)]
        with_gateway: bool,
    },
    Comment {
        caller: Address,
        profile_id: ProfileId,
        profile_id_pointed: ProfileId,
        pub_id_pointed: PubId,
        #[serde(default)]
        reference_data: Option<ReferenceData>,
        #[serde(default)]
        with_gateway: bool,
    },
    AddSeedRewards {
        caller: Address,
        profile_ids: Vec<ProfileId>,
        rewards: Vec<SeedReward>,
        multipliers: Vec<u64>,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    Claim {
        caller: Address,
        profile_id: ProfileId,
        amount: Amount,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    SetRelayer {
        caller: Address,
        relayer: Address,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mint { .. } => "mint",
            Step::Approve { .. } => "approve",
            Step::Post { .. } => "post",
            Step::Comment { .. } => "comment",
            Step::AddSeedRewards { .. } => "add_seed_rewards",
            Step::Claim { .. } => "claim",
            Step::SetRelayer { .. } => "set_relayer",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    #[serde(default)]
    pub config: Option<SeedConfig>,
    /// Controllers of profiles 1..=n, in order.
    pub profiles: Vec<Address>,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: usize,
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_id: Option<PubId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayReport {
    pub outcomes: Vec<StepOutcome>,
    pub module_holdings: Amount,
    pub claimable_total: Amount,
    pub ledger: LedgerSnapshot,
}

/// Failure of a single step. Ledger and gateway failures keep their class.
enum StepFailure {
    Seed(SeedError),
    Input(ReferenceDataError),
    Currency(TransferError),
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Builds a module with the scenario's profiles. `config` takes precedence
    /// over the scenario's own config block.
    pub fn build_module(
        &self,
        config: Option<SeedConfig>,
    ) -> Result<ScenarioModule, ScenarioError> {
        let config = config
            .or_else(|| self.config.clone())
            .ok_or(ScenarioError::MissingConfig)?;
        config.validate()?;
        let mut profiles = ProfileDirectory::new();
        for controller in &self.profiles {
            profiles.register(*controller);
        }
        Ok(SeedModule::new(config, profiles, MemoryCurrency::new()))
    }

    /// Runs every step in order. A failing step is recorded and the replay
    /// carries on, the way a rejected transaction leaves the chain intact.
    pub fn replay(&self, module: &mut ScenarioModule) -> Vec<StepOutcome> {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                let result = run_step(module, step, idx as u64);
                match result {
                    Ok(pub_id) => {
                        debug!(step = idx, action = step.name(), "step applied");
                        StepOutcome {
                            step: idx,
                            action: step.name().to_string(),
                            ok: true,
                            pub_id,
                            error: None,
                            class: None,
                        }
                    }
                    Err(failure) => {
                        let (error, class) = match failure {
                            StepFailure::Seed(err) => (err.to_string(), Some(err.class())),
                            StepFailure::Input(err) => {
                                (err.to_string(), Some(ErrorClass::Validation))
                            }
                            StepFailure::Currency(err) => {
                                (err.to_string(), Some(ErrorClass::Transfer))
                            }
                        };
                        warn!(step = idx, action = step.name(), %error, "step rejected");
                        StepOutcome {
                            step: idx,
                            action: step.name().to_string(),
                            ok: false,
                            pub_id: None,
                            error: Some(error),
                            class,
                        }
                    }
                }
            })
            .collect()
    }

    pub fn run(
        &self,
        config: Option<SeedConfig>,
    ) -> Result<(ScenarioModule, ReplayReport), ScenarioError> {
        let mut module = self.build_module(config)?;
        let outcomes = self.replay(&mut module);
        let report = ReplayReport {
            outcomes,
            module_holdings: module.currency().balance_of(&module.address()),
            claimable_total: module.ledger().claimable_total(),
            ledger: module.snapshot(),
        };
        Ok((module, report))
    }
}

fn run_step(
    module: &mut ScenarioModule,
    step: &Step,
    default_timestamp: u64,
) -> Result<Option<PubId>, StepFailure> {
    match step {
        Step::Mint { to, amount } => {
            module
                .currency_mut()
                .mint(to, *amount)
                .map_err(StepFailure::Currency)?;
            Ok(None)
        }
        Step::Approve { owner, amount } => {
            let spender = module.address();
            module.currency_mut().approve(owner, &spender, *amount);
            Ok(None)
        }
        Step::Post {
            caller,
            profile_id,
            with_gateway,
        } => module
            .post(caller, *profile_id, *with_gateway)
            .map(Some)
            .map_err(StepFailure::Seed),
        Step::Comment {
            caller,
            profile_id,
            profile_id_pointed,
            pub_id_pointed,
            reference_data,
            with_gateway,
        } => {
            let reference_data = match reference_data {
                Some(data) => data.to_bytes().map_err(StepFailure::Input)?,
                None => Vec::new(),
            };
            let request = CommentRequest {
                profile_id: *profile_id,
                profile_id_pointed: *profile_id_pointed,
                pub_id_pointed: *pub_id_pointed,
                reference_data,
                with_gateway: *with_gateway,
            };
            module
                .comment(caller, &request)
                .map(Some)
                .map_err(StepFailure::Seed)
        }
        Step::AddSeedRewards {
            caller,
            profile_ids,
            rewards,
            multipliers,
            timestamp,
        } => {
            module
                .add_seed_rewards(
                    caller,
                    profile_ids,
                    rewards,
                    multipliers,
                    timestamp.unwrap_or(default_timestamp),
                )
                .map_err(StepFailure::Seed)?;
            Ok(None)
        }
        Step::Claim {
            caller,
            profile_id,
            amount,
            timestamp,
        } => {
            module
                .claim(caller, *profile_id, *amount, timestamp.unwrap_or(default_timestamp))
                .map_err(StepFailure::Seed)?;
            Ok(None)
        }
        Step::SetRelayer { caller, relayer } => {
            module
                .set_relayer(caller, *relayer)
                .map_err(StepFailure::Seed)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
  "config": {
    "owner": "0x0000000000000000000000000000000000000001",
    "relayer": "0x0000000000000000000000000000000000000002",
    "module_address": "0x0000000000000000000000000000000000000003",
    "payment_amount": 10
  },
  "profiles": [
    "0x0000000000000000000000000000000000000064",
    "0x00000000000000000000000000000000000000c8"
  ],
  "steps": [
    { "action": "post", "caller": "0x0000000000000000000000000000000000000064",
      "profile_id": 1, "with_gateway": true },
    { "action": "comment", "caller": "0x00000000000000000000000000000000000000c8", "profile_id": 2,
      "profile_id_pointed": 1, "pub_id_pointed": 1 },
    { "action": "mint", "to": "0x00000000000000000000000000000000000000c8", "amount": 20 },
    { "action": "approve", "owner": "0x00000000000000000000000000000000000000c8", "amount": 10 },
    { "action": "comment", "caller": "0x00000000000000000000000000000000000000c8", "profile_id": 2,
      "profile_id_pointed": 1, "pub_id_pointed": 1 },
    { "action": "add_seed_rewards", "caller": "0x0000000000000000000000000000000000000002",
      "profile_ids": [1], "rewards": [{ "sun": 100, "rain": 80, "soil": 30 }], "multipliers": [1] },
    { "action": "claim", "caller": "0x0000000000000000000000000000000000000064",
      "profile_id": 1, "amount": 100 },
    { "action": "claim", "caller": "0x0000000000000000000000000000000000000064",
      "profile_id": 1, "amount": 10 }
  ]
}"#;

    #[test]
    fn replay_records_each_outcome() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let (module, report) = scenario.run(None).unwrap();
        let oks: Vec<_> = report.outcomes.iter().map(|o| o.ok).collect();
        assert_eq!(oks, vec![true, false, true, true, true, true, false, true]);
        assert_eq!(report.outcomes[1].class, Some(ErrorClass::Transfer));
        assert_eq!(report.outcomes[4].pub_id, Some(1));
        assert_eq!(report.outcomes[6].class, Some(ErrorClass::InsufficientFunds));
        assert_eq!(report.module_holdings, 0);
        assert_eq!(report.claimable_total, 20);
        assert_eq!(module.reward_of(1).soil, 20);
        assert_eq!(report.ledger.events.len(), 2);
    }

    #[test]
    fn reference_data_forms_agree() {
        let payer = Address::from_low_u64(0xc8);
        let word = payer.to_abi_word();
        let hex_form = ReferenceData::Hex {
            hex: format!("0x{}", hex::encode(word)),
        };
        let b64_form = ReferenceData::B64 {
            b64: general_purpose::STANDARD.encode(word),
        };
        let payer_form = ReferenceData::Payer { payer };
        assert_eq!(hex_form.to_bytes().unwrap(), word.to_vec());
        assert_eq!(b64_form.to_bytes().unwrap(), word.to_vec());
        assert_eq!(payer_form.to_bytes().unwrap(), word.to_vec());

        let parsed: ReferenceData =
            serde_json::from_str(r#"{ "payer": "0x00000000000000000000000000000000000000c8" }"#)
                .unwrap();
        assert_eq!(parsed, payer_form);
        assert!(matches!(
            ReferenceData::Hex { hex: "zz".into() }.to_bytes(),
            Err(ReferenceDataError::Hex(_))
        ));
        assert!(matches!(
            ReferenceData::B64 { b64: "***".into() }.to_bytes(),
            Err(ReferenceDataError::Base64(_))
        ));
    }

    #[test]
    fn demo_thread_replays_from_disk() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/thread.json");
        let scenario = Scenario::load(&path).unwrap();
        let (module, report) = scenario.run(None).unwrap();

        let failed: Vec<_> = report.outcomes.iter().filter(|o| !o.ok).map(|o| o.step).collect();
        assert_eq!(failed, vec![11]);
        assert_eq!(report.outcomes[11].class, Some(ErrorClass::InsufficientFunds));
        assert_eq!(report.outcomes[8].pub_id, Some(3));
        assert_eq!(report.module_holdings, 24);
        assert_eq!(report.claimable_total, 2);

        let ranked = module.top_children((1, 1), 1, None).unwrap();
        let ids: Vec<_> = ranked.iter().map(|r| (r.pub_id, r.score)).collect();
        assert_eq!(ids, vec![(2, 1), (1, 0), (3, 0)]);
    }

    #[test]
    fn config_is_required_somewhere() {
        let scenario = Scenario {
            config: None,
            profiles: vec![],
            steps: vec![],
        };
        assert!(matches!(
            scenario.build_module(None),
            Err(ScenarioError::MissingConfig)
        ));
        let config = SeedConfig::new(
            Address::from_low_u64(1),
            Address::from_low_u64(2),
            Address::from_low_u64(3),
        );
        assert!(scenario.build_module(Some(config)).is_ok());
    }
}
