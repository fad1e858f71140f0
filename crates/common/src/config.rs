//! Supervisor configuration loaded from TOML with serde.
//!
//! Every section has defaults, so an empty file is a valid development
//! configuration as long as the store backend does not need a path.
//! Individual keys can be overridden through `FSV_*` environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::hash::HashAlgo;

/// Worker count used when the configured value is not positive.
pub const DEFAULT_RECONCILER_WORKERS: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing mandatory config key: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    pub store: StoreConfig,
    pub farmer: FarmerConfig,
    pub reconciler: ReconcilerConfig,
    pub persist: PersistConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// "lmdb" or "memory".
    pub backend: String,
    /// Database directory, required by the lmdb backend.
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: "lmdb".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FarmerConfig {
    pub ping: PingConfig,
    pub challenge: ChallengeConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PingConfig {
    /// Base heartbeat interval.
    pub interval_secs: u64,
    /// Upper jitter bound added on top of the base interval.
    pub up_secs: u64,
    /// Lower jitter bound subtracted from the base interval.
    pub down_secs: u64,
    /// Consecutive missed heartbeats before a farmer is forced offline.
    pub lost_count: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            interval_secs: 900,
            up_secs: 0,
            down_secs: 0,
            lost_count: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChallengeConfig {
    pub hash_algo: String,
    /// How long a farmer has to answer an issued challenge.
    pub answer_delay_secs: u64,
    /// Flat credit for a passed ping or challenge.
    pub reward: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        ChallengeConfig {
            hash_algo: HashAlgo::Sha256.as_str().to_string(),
            answer_delay_secs: 300,
            reward: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// Max concurrent per-farmer checks. Signed so a misconfigured
    /// negative value parses and can be replaced by the fallback.
    pub workers: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            interval_secs: 10,
            workers: DEFAULT_RECONCILER_WORKERS as i64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistConfig {
    /// Attempts per durable write before the snapshot is dropped.
    pub retry_limit: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig { retry_limit: 3 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Load config from a TOML file path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Override individual keys from `FSV_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("FSV_STORE_BACKEND") {
            self.store.backend = v;
        }
        if let Ok(v) = env::var("FSV_STORE_PATH") {
            self.store.path = Some(v);
        }
        override_parsed("FSV_PING_INTERVAL_SECS", &mut self.farmer.ping.interval_secs)?;
        override_parsed("FSV_PING_UP_SECS", &mut self.farmer.ping.up_secs)?;
        override_parsed("FSV_PING_DOWN_SECS", &mut self.farmer.ping.down_secs)?;
        override_parsed("FSV_LOST_COUNT", &mut self.farmer.ping.lost_count)?;
        if let Ok(v) = env::var("FSV_CHALLENGE_HASH_ALGO") {
            self.farmer.challenge.hash_algo = v;
        }
        override_parsed(
            "FSV_CHALLENGE_ANSWER_DELAY_SECS",
            &mut self.farmer.challenge.answer_delay_secs,
        )?;
        override_parsed("FSV_CHALLENGE_REWARD", &mut self.farmer.challenge.reward)?;
        override_parsed("FSV_RECONCILER_INTERVAL_SECS", &mut self.reconciler.interval_secs)?;
        override_parsed("FSV_RECONCILER_WORKERS", &mut self.reconciler.workers)?;
        if let Ok(v) = env::var("FSV_LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    /// Check mandatory keys. Only called at startup; a failure here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.store.backend.as_str() {
            "lmdb" => {
                let missing = self.store.path.as_deref().map_or(true, str::is_empty);
                if missing {
                    return Err(ConfigError::Missing("store.path"));
                }
            }
            "memory" => {}
            other => {
                return Err(ConfigError::Invalid {
                    key: "store.backend",
                    value: other.to_string(),
                })
            }
        }
        self.validate_runtime()
    }

    /// Checks that do not depend on the store section, for callers that
    /// bring an already opened store.
    pub fn validate_runtime(&self) -> Result<(), ConfigError> {
        self.challenge_hash_algo()?;

        if self.farmer.ping.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "farmer.ping.interval_secs",
                value: "0".to_string(),
            });
        }
        if self.reconciler.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "reconciler.interval_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn challenge_hash_algo(&self) -> Result<HashAlgo, ConfigError> {
        self.farmer
            .challenge
            .hash_algo
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: "farmer.challenge.hash_algo",
                value: self.farmer.challenge.hash_algo.clone(),
            })
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.farmer.ping.interval_secs)
    }

    pub fn answer_delay(&self) -> Duration {
        Duration::from_secs(self.farmer.challenge.answer_delay_secs)
    }

    pub fn reconciler_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.interval_secs)
    }

    /// Configured worker count, or the fallback when it is not positive.
    pub fn reconciler_workers(&self) -> usize {
        if self.reconciler.workers > 0 {
            self.reconciler.workers as usize
        } else {
            DEFAULT_RECONCILER_WORKERS
        }
    }
}

fn override_parsed<T: FromStr>(key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw.clone() })?;
    }
    Ok(())
}
