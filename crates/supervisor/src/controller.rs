//! Account controller: one per process.
//!
//! ```text
//!  caller ──▶ with_handler(id) ──▶ directory hit? ── yes ──▶ run op
//!                                       │ no
//!                                       ▼
//!                          queued snapshot / store record? ── yes ──▶ rehydrate
//!                                       │ no
//!                                       ▼
//!                                 mint OFFLINE
//!
//!  after op: dirty ──▶ persist queue     OFFLINE ──▶ evict from directory
//! ```
//!
//! Every handler mutation happens under the directory write lock. Durable
//! writes are handed to the [`Persister`] after the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fsv_common::{HashAlgo, SupervisorConfig};
use fsv_storage::{open_store, KvStore};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::account::{BlockRange, FarmerAccount, FarmerState};
use crate::block_source::{BlockSource, EmptyBlockSource};
use crate::clock::{Clock, SystemClock};
use crate::directory::{AccountTree, TERMINATOR};
use crate::error::{Result, SupervisorError};
use crate::handler::{DeadlineReport, FarmerAccountHandler, HandlerContext, PingOutcome};
use crate::persist::Persister;
use crate::reconciler::Reconciler;

pub struct AccountController {
    directory: RwLock<AccountTree<FarmerAccountHandler>>,
    store: Arc<dyn KvStore>,
    persister: Persister,
    ctx: Arc<HandlerContext>,
    reconciler_interval: Duration,
    reconciler_workers: usize,
    shutdown: Arc<Notify>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl AccountController {
    /// Build a controller over an already opened store. Must be called
    /// inside a tokio runtime.
    pub fn new(
        cfg: &SupervisorConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        blocks: Arc<dyn BlockSource>,
    ) -> Result<Arc<Self>> {
        cfg.validate_runtime()?;
        let ctx = HandlerContext::from_config(cfg, clock, blocks)?;
        if cfg.reconciler.workers <= 0 {
            warn!(
                configured = cfg.reconciler.workers,
                fallback = cfg.reconciler_workers(),
                "reconciler workers must be positive, using fallback"
            );
        }

        Ok(Arc::new(Self {
            directory: RwLock::new(AccountTree::new()),
            persister: Persister::start(Arc::clone(&store), cfg.persist.retry_limit),
            store,
            ctx: Arc::new(ctx),
            reconciler_interval: cfg.reconciler_interval(),
            reconciler_workers: cfg.reconciler_workers(),
            shutdown: Arc::new(Notify::new()),
            reconciler: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    /// Validate `cfg`, open the configured store and build a controller on
    /// the system clock with no ledger attached.
    pub fn open(cfg: &SupervisorConfig) -> Result<Arc<Self>> {
        cfg.validate()?;
        let store = open_store(&cfg.store.backend, cfg.store.path.as_deref())?;
        info!(backend = %cfg.store.backend, "account store opened");
        Self::new(cfg, store, Arc::new(SystemClock), Arc::new(EmptyBlockSource))
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    pub fn hash_algo(&self) -> HashAlgo {
        self.ctx.hash_algo
    }

    /// Spawn the background reconciler. A second call is a no-op.
    pub fn start_reconciler(self: &Arc<Self>) {
        let mut slot = self.reconciler.lock();
        if slot.is_some() {
            return;
        }
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(self),
            self.reconciler_interval,
            self.reconciler_workers,
            Arc::clone(&self.shutdown),
        ));
        *slot = Some(reconciler.start());
    }

    /// Run `f` against the handler for `farmer_id`, creating it if needed.
    pub fn with_handler<R>(
        &self,
        farmer_id: &str,
        f: impl FnOnce(&mut FarmerAccountHandler) -> R,
    ) -> Result<R> {
        self.ensure_open()?;
        validate_id(farmer_id)?;

        let (out, snapshot) = {
            let mut dir = self.directory.write();
            if !dir.contains(farmer_id) {
                let handler = self.load_or_mint(farmer_id);
                dir.put(farmer_id, handler)?;
            }
            self.apply(&mut dir, farmer_id, f)?
        };
        self.persist(farmer_id, snapshot);
        Ok(out)
    }

    /// Like [`with_handler`](Self::with_handler) but only for handlers
    /// already in the directory.
    pub fn with_existing_handler<R>(
        &self,
        farmer_id: &str,
        f: impl FnOnce(&mut FarmerAccountHandler) -> R,
    ) -> Option<R> {
        if self.is_closed() {
            return None;
        }
        let (out, snapshot) = {
            let mut dir = self.directory.write();
            if !dir.contains(farmer_id) {
                return None;
            }
            self.apply(&mut dir, farmer_id, f).ok()?
        };
        self.persist(farmer_id, snapshot);
        Some(out)
    }

    pub fn on_line(&self, farmer_id: &str) -> Result<()> {
        self.with_handler(farmer_id, |h| h.on_line())?
    }

    pub fn ping(&self, farmer_id: &str, high: u64, low: u64) -> Result<PingOutcome> {
        self.with_handler(farmer_id, |h| h.ping(high, low))?
    }

    pub fn conquer_challenge(
        &self,
        farmer_id: &str,
        range: BlockRange,
        algo: HashAlgo,
        submitted_hash: &str,
    ) -> Result<()> {
        self.with_handler(farmer_id, |h| h.conquer_challenge(range, algo, submitted_hash))?
    }

    pub fn lost(&self, farmer_id: &str) -> Result<()> {
        self.with_handler(farmer_id, |h| h.lost())?
    }

    pub fn off_line(&self, farmer_id: &str) -> Result<()> {
        self.with_handler(farmer_id, |h| h.off_line())?
    }

    pub fn next_ping_time(&self, farmer_id: &str) -> Result<u64> {
        self.with_handler(farmer_id, |h| h.next_ping_time())
    }

    /// Read-only view of a farmer's record. Does not create anything.
    pub fn account(&self, farmer_id: &str) -> Result<FarmerAccount> {
        self.ensure_open()?;
        validate_id(farmer_id)?;

        if let Ok(h) = self.directory.read().get(farmer_id) {
            return Ok(h.account().clone());
        }
        match self.stored_record(farmer_id) {
            Some(bytes) => FarmerAccount::decode(&bytes),
            None => Err(SupervisorError::NotFound),
        }
    }

    /// Reconciler entry point: enforce both deadlines for one farmer.
    pub fn check_deadlines(&self, farmer_id: &str) -> Option<DeadlineReport> {
        let now = self.ctx.now();
        self.with_existing_handler(farmer_id, |h| h.enforce_deadlines(now))
    }

    /// Ids currently held in memory, sorted.
    pub fn farmer_ids(&self) -> Vec<String> {
        self.directory.read().keys()
    }

    pub fn farmer_ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.directory.read().keys_with_prefix(prefix)
    }

    pub fn directory_len(&self) -> usize {
        self.directory.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the reconciler, flush pending writes, close the store and drop
    /// all in-memory state. Further operations fail with `Closed`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.notify_one();
        let task = self.reconciler.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("reconciler task aborted: {}", e);
            }
        }

        self.persister.close().await;
        let closed = self.store.close();

        self.ctx.verifier.challenges().close();
        self.ctx.verifier.block_hashes().close();
        self.directory.write().clear();
        info!("account controller closed");

        closed.map_err(SupervisorError::from)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SupervisorError::Closed);
        }
        Ok(())
    }

    /// Run `f`, then evict the handler if it ended OFFLINE. Returns the
    /// encoded record when it changed.
    fn apply<R>(
        &self,
        dir: &mut AccountTree<FarmerAccountHandler>,
        farmer_id: &str,
        f: impl FnOnce(&mut FarmerAccountHandler) -> R,
    ) -> Result<(R, Option<Vec<u8>>)> {
        let handler = dir.get_mut(farmer_id)?;
        let out = f(handler);

        let snapshot = if handler.take_dirty() {
            match handler.account().encode() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    error!(farmer = farmer_id, "encode account failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if handler.state() == FarmerState::Offline {
            dir.delete(farmer_id)?;
            debug!(farmer = farmer_id, "offline handler evicted");
        }
        Ok((out, snapshot))
    }

    fn persist(&self, farmer_id: &str, snapshot: Option<Vec<u8>>) {
        if let Some(bytes) = snapshot {
            self.persister.enqueue(farmer_id, bytes);
        }
    }

    /// Latest durable bytes, preferring a snapshot still in the queue.
    /// Read failures count as absent.
    fn stored_record(&self, farmer_id: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.persister.peek(farmer_id) {
            return Some(bytes);
        }
        match self.store.get(farmer_id.as_bytes()) {
            Ok(found) => found,
            Err(e) => {
                warn!(farmer = farmer_id, "store read failed: {}", e);
                None
            }
        }
    }

    fn load_or_mint(&self, farmer_id: &str) -> FarmerAccountHandler {
        let ctx = Arc::clone(&self.ctx);
        if let Some(bytes) = self.stored_record(farmer_id) {
            match FarmerAccount::decode(&bytes) {
                Ok(account) => {
                    debug!(farmer = farmer_id, state = %account.state, "handler rehydrated");
                    return FarmerAccountHandler::from_account(account, ctx);
                }
                Err(e) => warn!(farmer = farmer_id, "stored account unreadable: {}", e),
            }
        }
        debug!(farmer = farmer_id, "new farmer account");
        FarmerAccountHandler::new(farmer_id, ctx)
    }
}

fn validate_id(farmer_id: &str) -> Result<()> {
    if farmer_id.is_empty() {
        return Err(SupervisorError::InvalidArgument("empty farmer id".to_string()));
    }
    if farmer_id.as_bytes().contains(&TERMINATOR) {
        return Err(SupervisorError::InvalidArgument(
            "farmer id contains NUL byte".to_string(),
        ));
    }
    Ok(())
}
