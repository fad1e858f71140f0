//! # FSV Common Crate
//!
//! Shared utilities for the farmer supervisor.
//!
//! ## Modules
//! - `hash`: digest helpers for challenge binding and cache keys
//! - `config`: typed TOML configuration with env overrides
//! - `time`: wall-clock helpers in Unix milliseconds

pub mod config;
pub mod hash;
pub mod time;

pub use config::{ConfigError, SupervisorConfig};
pub use hash::{hash_hex, sha256_hex, HashAlgo, UnknownHashAlgo};
pub use time::now_millis;
