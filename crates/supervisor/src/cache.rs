//! Insert-once lookup tables for issued challenges and block-range digests.
//!
//! Keys are the SHA-256 hex of the logical tuple joined with `/`, so every
//! entry is addressed by one fixed-width string. Neither cache expires
//! anything on its own; stale challenges are removed by the reconciler.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use fsv_common::{sha256_hex, HashAlgo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::BlockRange;

/// A challenge handed to a farmer and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub farmer_id: String,
    pub range: BlockRange,
    pub hash_algo: HashAlgo,
}

impl ChallengeRequest {
    pub fn new(farmer_id: impl Into<String>, range: BlockRange, hash_algo: HashAlgo) -> Self {
        Self {
            farmer_id: farmer_id.into(),
            range,
            hash_algo,
        }
    }

    pub fn cache_key(&self) -> String {
        challenge_key(&self.farmer_id, self.range, self.hash_algo)
    }

    /// True if this request was issued for exactly these parameters.
    pub fn matches(&self, range: BlockRange, hash_algo: HashAlgo) -> bool {
        self.range == range && self.hash_algo == hash_algo
    }
}

pub fn challenge_key(farmer_id: &str, range: BlockRange, algo: HashAlgo) -> String {
    let raw = format!("{}/{}/{}/{}", farmer_id, range.high, range.low, algo.as_str());
    sha256_hex(raw.as_bytes())
}

pub fn block_hash_key(range: BlockRange, algo: HashAlgo) -> String {
    let raw = format!("{}/{}/{}", range.high, range.low, algo.as_str());
    sha256_hex(raw.as_bytes())
}

#[derive(Debug, Default)]
pub struct ChallengeCache {
    entries: RwLock<HashMap<String, Arc<ChallengeRequest>>>,
}

impl ChallengeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `req` unless an identical request exists. Returns the entry
    /// now in the cache and whether this call inserted it.
    pub fn set(&self, req: ChallengeRequest) -> (Arc<ChallengeRequest>, bool) {
        let key = req.cache_key();
        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(e) => {
                debug!(farmer = %req.farmer_id, range = %req.range, "challenge already exists");
                (Arc::clone(e.get()), false)
            }
            Entry::Vacant(v) => {
                let entry = Arc::clone(v.insert(Arc::new(req)));
                (entry, true)
            }
        }
    }

    pub fn get(
        &self,
        farmer_id: &str,
        range: BlockRange,
        algo: HashAlgo,
    ) -> Option<Arc<ChallengeRequest>> {
        let key = challenge_key(farmer_id, range, algo);
        self.entries.read().get(&key).cloned()
    }

    /// Remove and return the entry. At most one caller gets `Some` for a
    /// given request.
    pub fn delete(
        &self,
        farmer_id: &str,
        range: BlockRange,
        algo: HashAlgo,
    ) -> Option<Arc<ChallengeRequest>> {
        let key = challenge_key(farmer_id, range, algo);
        self.entries.write().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn close(&self) {
        self.entries.write().clear();
    }
}

/// Precomputed digest of a block range under one algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHashItem {
    pub range: BlockRange,
    pub hash_algo: HashAlgo,
    pub hash: String,
}

#[derive(Debug, Default)]
pub struct BlockHashCache {
    entries: RwLock<HashMap<String, Arc<BlockHashItem>>>,
}

impl BlockHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-once. A losing concurrent insert gets the winner's entry back.
    pub fn set(&self, item: BlockHashItem) -> (Arc<BlockHashItem>, bool) {
        let key = block_hash_key(item.range, item.hash_algo);
        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(v) => (Arc::clone(v.insert(Arc::new(item))), true),
        }
    }

    pub fn get(&self, range: BlockRange, algo: HashAlgo) -> Option<Arc<BlockHashItem>> {
        let key = block_hash_key(range, algo);
        let hit = self.entries.read().get(&key).cloned();
        match &hit {
            Some(_) => debug!(%range, algo = %algo, "block hash cache hit"),
            None => debug!(%range, algo = %algo, "block hash cache miss"),
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn close(&self) {
        self.entries.write().clear();
    }
}
