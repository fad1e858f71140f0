//! # Farmer Supervisor
//!
//! Tracks the connectivity state of remote storage farmers, challenges them
//! to prove they still hold the blocks they claim, and keeps a reward
//! balance per farmer.
//!
//! ```text
//!   wire layer ──▶ FarmerPublic ──▶ AccountController ◀── Reconciler (tick)
//!                                        │
//!                   ┌────────────────────┼────────────────────┐
//!                   ▼                    ▼                    ▼
//!            AccountTree<Handler>    Persister ──▶ KvStore   HandlerContext
//!                   │                                         │
//!                   ▼                                         ▼
//!          FarmerAccountHandler ──────────────▶ ChallengeVerifier
//!            (fsm, deadlines)                   ├─ ChallengeCache
//!                                               ├─ BlockHashCache
//!                                               └─ BlockSource
//! ```
//!
//! ## Modules
//! - `account`: durable farmer record and its bincode encoding
//! - `fsm`: OFFLINE / ONLINE / LOST transition table
//! - `directory`: byte-wise trie keyed by farmer id
//! - `cache`: insert-once challenge and block-hash caches
//! - `challenge`: range selection, answer binding and verification
//! - `handler`: per-farmer operations and deadline checks
//! - `controller`: handler lookup, eviction, persistence, shutdown
//! - `reconciler`: periodic bounded-concurrency deadline scan
//! - `persist`: coalescing background writer
//! - `api`: request/response structs for the farmer-facing calls

pub mod account;
pub mod api;
pub mod block_source;
pub mod cache;
pub mod challenge;
pub mod clock;
pub mod controller;
pub mod directory;
pub mod error;
pub mod fsm;
pub mod handler;
pub mod persist;
pub mod ping;
pub mod reconciler;

pub use account::{BlockRange, FarmerAccount, FarmerState};
pub use api::{FarmerPublic, ResponseError};
pub use block_source::{BlockSource, EmptyBlockSource, MemoryBlockSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::AccountController;
pub use error::{ErrorType, Result, SupervisorError};
pub use fsm::FarmerEvent;
pub use handler::{FarmerAccountHandler, PingOutcome};
pub use reconciler::{Reconciler, TickReport};
