//! LMDB backend for farmer account records.
//!
//! One environment per process, one named database. Keys are farmer ids,
//! values are whatever the caller encoded.

use std::fs;
use std::path::{Path, PathBuf};

use lmdb::{Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::store::{KvStore, StoreError};

/// Named database holding the account records.
pub const DB_FARMER_ACCOUNTS: &str = "farmer_accounts";

const MAP_SIZE: usize = 1_000_000_000;

pub struct LmdbStore {
    path: PathBuf,
    // None once closed; dropping the Environment closes the handle
    inner: RwLock<Option<(Environment, Database)>>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.path)
            .field("open", &self.inner.read().is_some())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) the environment at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let p = path.as_ref();
        fs::create_dir_all(p)?;

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(MAP_SIZE)
            .open(p)?;
        let db = env.create_db(Some(DB_FARMER_ACCOUNTS), DatabaseFlags::empty())?;

        info!("lmdb store opened at {}", p.display());
        Ok(Self {
            path: p.to_path_buf(),
            inner: RwLock::new(Some((env, db))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read();
        let (env, db) = guard.as_ref().ok_or(StoreError::Closed)?;
        let rtxn = env.begin_ro_txn()?;
        let value = match rtxn.get(*db, &key) {
            Ok(v) => Some(v.to_vec()),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        rtxn.commit()?;
        Ok(value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let guard = self.inner.read();
        let (env, db) = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut wtxn = env.begin_rw_txn()?;
        wtxn.put(*db, &key, &value, WriteFlags::empty())?;
        wtxn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let guard = self.inner.read();
        let (env, db) = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut wtxn = env.begin_rw_txn()?;
        match wtxn.del(*db, &key, None) {
            Ok(_) => {}
            Err(lmdb::Error::NotFound) => {} // already deleted, OK
            Err(e) => return Err(e.into()),
        }
        wtxn.commit()?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        if let Some((env, _db)) = guard.take() {
            env.sync(true)?;
            debug!("lmdb store at {} closed", self.path.display());
        }
        Ok(())
    }
}
