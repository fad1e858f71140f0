//! Background durable writes for account snapshots.
//!
//! Callers enqueue the latest encoded record per farmer and return at once.
//! The queue holds at most one snapshot per farmer id (a newer snapshot
//! replaces an unwritten older one), and a single worker drains it into the
//! store. A write that keeps failing is dropped after `retry_limit`
//! attempts; the in-memory handler stays authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use fsv_storage::KvStore;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

const RETRY_BACKOFF_MS: u64 = 50;

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, Vec<u8>>,
    in_flight: HashMap<String, Vec<u8>>,
    closing: bool,
}

struct PersistQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    store: Arc<dyn KvStore>,
    retry_limit: u32,
}

impl PersistQueue {
    /// Move everything pending to in-flight and return it, together with
    /// the closing flag read under the same lock.
    fn take_batch(&self) -> (Vec<(String, Vec<u8>)>, bool) {
        let mut st = self.state.lock();
        let batch = std::mem::take(&mut st.pending);
        st.in_flight = batch.clone();
        (batch.into_iter().collect(), st.closing)
    }

    async fn write(&self, key: &str, value: &[u8]) {
        let attempts = self.retry_limit.max(1);
        for attempt in 1..=attempts {
            match self.store.set(key.as_bytes(), value) {
                Ok(()) => {
                    debug!(farmer = key, "account persisted");
                    break;
                }
                Err(e) if attempt < attempts => {
                    warn!(farmer = key, attempt, "persist failed, retrying: {}", e);
                    sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => {
                    error!(farmer = key, attempts, "persist failed, dropping snapshot: {}", e);
                }
            }
        }
        self.state.lock().in_flight.remove(key);
    }
}

pub struct Persister {
    queue: Arc<PersistQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(store: Arc<dyn KvStore>, retry_limit: u32) -> Self {
        let queue = Arc::new(PersistQueue {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            store,
            retry_limit,
        });

        let q = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            debug!("persist worker started");
            loop {
                let (batch, closing) = q.take_batch();
                if batch.is_empty() {
                    if closing {
                        break;
                    }
                    q.wake.notified().await;
                    continue;
                }
                for (key, value) in batch {
                    q.write(&key, &value).await;
                }
            }
            info!("persist worker drained and stopped");
        });

        Self {
            queue,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a snapshot. Never blocks on the store. Returns false when the
    /// persister is closing and the snapshot was dropped.
    pub fn enqueue(&self, key: &str, value: Vec<u8>) -> bool {
        {
            let mut st = self.queue.state.lock();
            if st.closing {
                drop(st);
                warn!(farmer = key, "persister closed, snapshot dropped");
                return false;
            }
            st.pending.insert(key.to_string(), value);
        }
        self.queue.wake.notify_one();
        true
    }

    /// Latest snapshot for `key` that may not have reached the store yet.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        let st = self.queue.state.lock();
        st.pending.get(key).or_else(|| st.in_flight.get(key)).cloned()
    }

    /// Snapshots not yet picked up by the worker.
    pub fn pending_len(&self) -> usize {
        self.queue.state.lock().pending.len()
    }

    /// Stop accepting snapshots and wait for the queue to drain.
    pub async fn close(&self) {
        self.queue.state.lock().closing = true;
        self.queue.wake.notify_one();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("persist worker aborted: {}", e);
            }
        }
    }
}
