//! fsv-storage
//!
//! Durable key/value storage for farmer account records. The supervisor
//! only talks to the [`KvStore`] trait; the backend is picked at startup.

pub mod lmdb_store;
pub mod memory;
pub mod store;

use std::sync::Arc;

pub use crate::lmdb_store::LmdbStore;
pub use crate::memory::MemoryStore;
pub use crate::store::{KvStore, StoreError};

pub const BACKEND_LMDB: &str = "lmdb";
pub const BACKEND_MEMORY: &str = "memory";

/// Open the configured backend. An empty backend name means lmdb.
pub fn open_store(backend: &str, path: Option<&str>) -> Result<Arc<dyn KvStore>, StoreError> {
    let backend = if backend.is_empty() { BACKEND_LMDB } else { backend };

    match backend {
        BACKEND_LMDB => {
            let path = path
                .filter(|p| !p.is_empty())
                .ok_or(StoreError::MissingPath(BACKEND_LMDB))?;
            Ok(Arc::new(LmdbStore::open(path)?))
        }
        BACKEND_MEMORY => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::UnsupportedBackend(other.to_string())),
    }
}
