//! Challenge-response proof of storage.
//!
//! ```text
//! Ping ──▶ pick_challenge_range ──▶ ChallengeCache::set
//!
//! Conquer ──▶ ChallengeCache::delete ──(absent)──▶ fail
//!                    │
//!                    ▼
//!          BlockHashCache::get ──(miss)──▶ BlockSource ──▶ hash ──▶ BlockHashCache::set
//!                    │
//!                    ▼
//!          HASH(algo, original + farmer_id) == submitted ?
//! ```
//!
//! The answer is bound to the farmer id, so one farmer cannot replay
//! another farmer's answer for the same range.

use std::sync::Arc;

use fsv_common::{hash_hex, HashAlgo};
use rand::Rng;
use tracing::{debug, warn};

use crate::account::BlockRange;
use crate::block_source::BlockSource;
use crate::cache::{BlockHashCache, BlockHashItem, ChallengeCache, ChallengeRequest};
use crate::error::{Result, SupervisorError};

/// Expected answer for a farmer: the digest of the original range hash
/// followed by the farmer id.
pub fn bind_conquer_hash(farmer_id: &str, algo: HashAlgo, original_hash: &str) -> String {
    let bound = format!("{}{}", original_hash, farmer_id);
    hash_hex(algo, bound.as_bytes())
}

/// Random sub-range of `[low, high]` with `low <= low' < high' <= high`.
/// `None` when the reported range is too narrow to challenge.
pub fn pick_challenge_range<R: Rng>(rng: &mut R, high: u64, low: u64) -> Option<BlockRange> {
    if high <= low {
        return None;
    }
    let challenge_high = high - rng.gen_range(0..high - low);
    let challenge_low = low + rng.gen_range(0..challenge_high - low);
    Some(BlockRange::new(challenge_high, challenge_low))
}

pub struct ChallengeVerifier {
    challenges: Arc<ChallengeCache>,
    block_hashes: Arc<BlockHashCache>,
    blocks: Arc<dyn BlockSource>,
}

impl ChallengeVerifier {
    pub fn new(
        challenges: Arc<ChallengeCache>,
        block_hashes: Arc<BlockHashCache>,
        blocks: Arc<dyn BlockSource>,
    ) -> Self {
        Self {
            challenges,
            block_hashes,
            blocks,
        }
    }

    pub fn challenges(&self) -> &ChallengeCache {
        &self.challenges
    }

    pub fn block_hashes(&self) -> &BlockHashCache {
        &self.block_hashes
    }

    /// Register a challenge. An identical outstanding request is reused.
    pub fn issue(&self, req: ChallengeRequest) -> (Arc<ChallengeRequest>, bool) {
        self.challenges.set(req)
    }

    /// Drop an outstanding challenge. Returns false if it was already gone.
    pub fn withdraw(&self, req: &ChallengeRequest) -> bool {
        self.challenges
            .delete(&req.farmer_id, req.range, req.hash_algo)
            .is_some()
    }

    /// Digest of the raw bytes of `range`, computed once per
    /// (range, algorithm) and cached afterwards.
    pub fn original_hash(&self, range: BlockRange, algo: HashAlgo) -> Result<String> {
        if let Some(item) = self.block_hashes.get(range, algo) {
            return Ok(item.hash.clone());
        }

        let bytes = self.blocks.block_range_bytes(range.high, range.low)?;
        let (item, _) = self.block_hashes.set(BlockHashItem {
            range,
            hash_algo: algo,
            hash: hash_hex(algo, &bytes),
        });
        Ok(item.hash.clone())
    }

    /// Consume the matching challenge and check the submitted answer.
    ///
    /// The challenge is consumed before the answer is checked, so every
    /// request can be verified at most once whatever the outcome.
    pub fn verify(
        &self,
        farmer_id: &str,
        range: BlockRange,
        algo: HashAlgo,
        submitted: &str,
    ) -> Result<()> {
        if self.challenges.delete(farmer_id, range, algo).is_none() {
            warn!(farmer = farmer_id, %range, algo = %algo, "no such challenge request");
            return Err(SupervisorError::VerificationFailed(format!(
                "no pending challenge for blocks {} with {}",
                range, algo
            )));
        }

        let original = self.original_hash(range, algo).map_err(|e| {
            warn!(farmer = farmer_id, %range, "block hash unavailable: {}", e);
            SupervisorError::VerificationFailed(format!("block hash unavailable: {}", e))
        })?;

        let expected = bind_conquer_hash(farmer_id, algo, &original);
        if !expected.eq_ignore_ascii_case(submitted) {
            warn!(
                farmer = farmer_id,
                farmer_hash = submitted,
                server_hash = %expected,
                "conquer challenge failed"
            );
            return Err(SupervisorError::VerificationFailed("hash mismatch".to_string()));
        }

        debug!(farmer = farmer_id, %range, "conquer challenge passed");
        Ok(())
    }
}
