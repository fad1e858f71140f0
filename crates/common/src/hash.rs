//! Hash helpers used by the challenge protocol and cache keys.
//!
//! Every digest is rendered as a lowercase hex string. Challenge answers are
//! compared byte-for-byte against these strings, so the output of
//! [`hash_hex`] for a given algorithm and input must never change.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use thiserror::Error;

/// Digest algorithms a challenge can be bound to.
///
/// Discriminants are stable; they are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashAlgo {
    Md5 = 0,
    Sha1 = 1,
    Sha224 = 2,
    #[default]
    Sha256 = 3,
    Sha384 = 4,
    Sha512 = 5,
    Sha3_224 = 6,
    Sha3_256 = 7,
    Sha3_384 = 8,
    Sha3_512 = 9,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 10] = [
        HashAlgo::Md5,
        HashAlgo::Sha1,
        HashAlgo::Sha224,
        HashAlgo::Sha256,
        HashAlgo::Sha384,
        HashAlgo::Sha512,
        HashAlgo::Sha3_224,
        HashAlgo::Sha3_256,
        HashAlgo::Sha3_384,
        HashAlgo::Sha3_512,
    ];

    /// Canonical upper-case name, also used inside cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgo::Md5 => "MD5",
            HashAlgo::Sha1 => "SHA1",
            HashAlgo::Sha224 => "SHA224",
            HashAlgo::Sha256 => "SHA256",
            HashAlgo::Sha384 => "SHA384",
            HashAlgo::Sha512 => "SHA512",
            HashAlgo::Sha3_224 => "SHA3224",
            HashAlgo::Sha3_256 => "SHA3256",
            HashAlgo::Sha3_384 => "SHA3384",
            HashAlgo::Sha3_512 => "SHA3512",
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown hash algorithm: {0}")]
pub struct UnknownHashAlgo(pub String);

impl FromStr for HashAlgo {
    type Err = UnknownHashAlgo;

    /// Accepts the canonical names case-insensitively, with or without
    /// separators (`sha3-256`, `SHA3_256` and `SHA3256` are the same).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();

        HashAlgo::ALL
            .iter()
            .copied()
            .find(|algo| algo.as_str() == normalized)
            .ok_or_else(|| UnknownHashAlgo(s.to_string()))
    }
}

fn digest_hex<D: Digest>(data: &[u8]) -> String {
    hex::encode(D::digest(data))
}

/// Compute the digest of `data` under `algo` and return lowercase hex.
pub fn hash_hex(algo: HashAlgo, data: &[u8]) -> String {
    match algo {
        HashAlgo::Md5 => digest_hex::<Md5>(data),
        HashAlgo::Sha1 => digest_hex::<Sha1>(data),
        HashAlgo::Sha224 => digest_hex::<Sha224>(data),
        HashAlgo::Sha256 => digest_hex::<Sha256>(data),
        HashAlgo::Sha384 => digest_hex::<Sha384>(data),
        HashAlgo::Sha512 => digest_hex::<Sha512>(data),
        HashAlgo::Sha3_224 => digest_hex::<Sha3_224>(data),
        HashAlgo::Sha3_256 => digest_hex::<Sha3_256>(data),
        HashAlgo::Sha3_384 => digest_hex::<Sha3_384>(data),
        HashAlgo::Sha3_512 => digest_hex::<Sha3_512>(data),
    }
}

/// Compute SHA-256 and return lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hash_hex(HashAlgo::Sha256, data)
}
