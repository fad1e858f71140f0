use std::collections::HashMap;

use parking_lot::RwLock;

use crate::store::{KvStore, StoreError};

/// Non-durable backend for tests and local development.
#[derive(Debug)]
pub struct MemoryStore {
    // None once closed
    entries: RwLock<Option<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.entries.read();
        let map = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.entries.write();
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.entries.write();
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        map.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.entries.write().take();
        Ok(())
    }
}
