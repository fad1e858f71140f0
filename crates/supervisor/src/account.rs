//! Durable farmer record and its storage encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Connectivity state of a farmer. Ordinals are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FarmerState {
    #[default]
    Offline = 0,
    Online = 1,
    Lost = 2,
}

impl fmt::Display for FarmerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FarmerState::Offline => "OFFLINE",
            FarmerState::Online => "ONLINE",
            FarmerState::Lost => "LOST",
        };
        f.write_str(s)
    }
}

/// Inclusive block range `[low, high]` as reported by a farmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockRange {
    pub high: u64,
    pub low: u64,
}

impl BlockRange {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// `high < low` is malformed.
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.low
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// The durable part of a farmer. One record per farmer id.
///
/// Timestamps are Unix milliseconds; `last_challenge_time == 0` means the
/// farmer never passed a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerAccount {
    pub farmer_id: String,
    pub balance: u64,
    pub state: FarmerState,
    pub last_modified_time: u64,
    pub last_challenge_time: u64,
}

impl FarmerAccount {
    /// Fresh record: OFFLINE with zero balance.
    pub fn new(farmer_id: impl Into<String>, now: u64) -> Self {
        Self {
            farmer_id: farmer_id.into(),
            balance: 0,
            state: FarmerState::Offline,
            last_modified_time: now,
            last_challenge_time: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
