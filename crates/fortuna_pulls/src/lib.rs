//! # FORTUNA Pulls - The Vault
//!
//! **Nothing is awarded without a committed, auditable record.**
//!
//! ## The Golden Path: One Pull
//!
//! ```text
//! PullService ──> admission (throttle flagged accounts)
//!      │
//!      ▼
//! PullEngine::execute_pull
//!      │   validate ─> pin banner ─> idempotency ─> verify spend
//!      │
//!      │   ┌──────────── (user, pool) exclusive section ────────────┐
//!      │   │ re-check idempotency ─> read ledger ─> read collection │
//!      │   │ draw ─> resolve ─> commit(result + ledger + grant)     │
//!      │   └────────────────────────────────────────────────────────┘
//!      │
//!      ├──> Notifier thread: monitor.observe ─> PullCommitted event
//!      ▼
//! PullResult
//! ```
//!
//! ## Guarantees
//!
//! 1. **Exactly once**: a request id commits at most one result, replays return it
//! 2. **Gapless**: sequence numbers per `(user, pool)` run 1, 2, 3, ... with no holes
//! 3. **Atomic**: result, ledger and collection change together or not at all
//! 4. **Fair**: the anti-gaming monitor never sees a pull before it is committed

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod journal;
pub mod locks;
pub mod request;
pub mod service;
pub mod signal;
pub mod spend;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, FortunaConfig};
pub use engine::{PullEngine, PullEngineBuilder};
pub use error::{EngineResult, ErrorCode, PullError, SinkError, SpendError, StoreError, StoreResult};
pub use events::{ChannelSink, DeliveryPolicy, EventSink, Notifier, PullCommitted};
pub use journal::{CommitLog, Journal, JournalEntry};
pub use locks::{KeyGuard, KeyedLocks};
pub use request::{PullRequest, PullResult, RequestId};
pub use service::{ErrorBody, PullResponse, PullService, PullTicket};
pub use spend::{SpendVerifier, TokenFormatVerifier};
pub use store::{CommitOutcome, LedgerKey, MemoryStore, PullCommit, PullStore};
