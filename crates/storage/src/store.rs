use std::fmt::Debug;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("store is closed")]
    Closed,

    #[error("not supported backend: {0}")]
    UnsupportedBackend(String),

    #[error("backend {0} needs a database path")]
    MissingPath(&'static str),
}

/// Byte-oriented durable key/value store.
///
/// `get` on an absent key returns `Ok(None)`. After `close` every call
/// returns [`StoreError::Closed`].
pub trait KvStore: Debug + Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}
