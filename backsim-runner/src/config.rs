//! Serializable backtest configuration.
//!
//! A run file is TOML with two tables:
//!
//! ```toml
//! [run]
//! initial_equity = 1000.0
//! data = "candles.csv"
//!
//! [policy]
//! side = "long"
//! entry_size = { type = "RISK_PCT_ACCOUNT", risk_pct = 0.01 }
//! stop_loss = { type = "PERCENT", sl_pct = 0.02 }
//! risk_reward = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use backsim_core::fingerprint::config_hash;
use backsim_core::policy::PolicyConfig;

/// Content-addressable run identifier (BLAKE3 hex).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseStr(#[from] toml::de::Error),
    #[error(transparent)]
    Policy(#[from] backsim_core::policy::ConfigError),
    #[error("initial_equity must be finite and > 0, got {0}")]
    InitialEquity(f64),
}

/// `[run]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    pub initial_equity: f64,
    /// Candle CSV path. Relative paths resolve against the config file.
    #[serde(default)]
    pub data: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub run: RunSection,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl BacktestConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a run file. A relative `data` path is rebased onto
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        if let (Some(data), Some(dir)) = (config.run.data.as_mut(), path.parent()) {
            if data.is_relative() {
                *data = dir.join(&*data);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let equity = self.run.initial_equity;
        if !(equity.is_finite() && equity > 0.0) {
            return Err(ConfigError::InitialEquity(equity));
        }
        self.policy.validate()?;
        Ok(())
    }

    /// Deterministic ID over the policy and the starting equity. The data
    /// path is excluded; the dataset is hashed separately.
    pub fn run_id(&self) -> RunId {
        let policy = config_hash(&self.policy).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(policy.as_bytes());
        hasher.update(&self.run.initial_equity.to_bits().to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}
