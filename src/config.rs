use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ledger::Amount;
use crate::tree::DEFAULT_RANKING_WIDTH;

pub const DEFAULT_PAYMENT_AMOUNT: Amount = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Roles and tunables for one seed module deployment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedConfig {
    pub owner: Address,
    pub relayer: Address,
    /// Account that collects comment payments and pays out claims.
    pub module_address: Address,
    #[serde(default = "default_payment_amount")]
    pub payment_amount: Amount,
    #[serde(default = "default_ranking_width")]
    pub ranking_width: usize,
}

fn default_payment_amount() -> Amount {
    DEFAULT_PAYMENT_AMOUNT
}

fn default_ranking_width() -> usize {
    DEFAULT_RANKING_WIDTH
}

impl SeedConfig {
    pub fn new(owner: Address, relayer: Address, module_address: Address) -> Self {
        Self {
            owner,
            relayer,
            module_address,
            payment_amount: DEFAULT_PAYMENT_AMOUNT,
            ranking_width: DEFAULT_RANKING_WIDTH,
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SeedConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.toml` or `.json` files.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SeedConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or_default().to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Applies `SEED_RELAYER` and `SEED_PAYMENT_AMOUNT` overrides.
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(relayer) = std::env::var("SEED_RELAYER") {
            self.relayer = relayer.parse().map_err(|e| ConfigError::Invalid {
                key: "SEED_RELAYER",
                reason: format!("{e}"),
            })?;
        }
        if let Ok(amount) = std::env::var("SEED_PAYMENT_AMOUNT") {
            self.payment_amount = amount.parse().map_err(|e| ConfigError::Invalid {
                key: "SEED_PAYMENT_AMOUNT",
                reason: format!("{e}"),
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_address.is_zero() {
            return Err(ConfigError::Invalid {
                key: "module_address",
                reason: "zero address cannot hold funds".into(),
            });
        }
        if self.relayer.is_zero() {
            return Err(ConfigError::Invalid {
                key: "relayer",
                reason: "zero address cannot sign batches".into(),
            });
        }
        Ok(())
    }
}
