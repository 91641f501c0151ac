//! # Pull Persistence
//!
//! Logical collections:
//!
//! | Collection     | Key                               | Mutability           |
//! |----------------|-----------------------------------|----------------------|
//! | `pull_results` | `request_id`                      | append-only          |
//! | by sequence    | `(user_id, pool_id, sequence)`    | append-only index    |
//! | `pity_ledger`  | `(user_id, pool_id)`              | one write per commit |
//! | collections    | `user_id`                         | grow-only            |
//!
//! Tables and pools live in the [`Catalog`](fortuna_odds::Catalog), not here.

mod memory;

pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use fortuna_guard::UserId;
use fortuna_odds::{ItemId, PityState, PoolId};

use crate::error::StoreResult;
use crate::request::PullResult;

/// Key of a pity ledger entry and of an exclusive section.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    /// Owner.
    pub user_id: UserId,
    /// Pool.
    pub pool_id: PoolId,
}

impl LedgerKey {
    /// Creates a key.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, pool_id: impl Into<PoolId>) -> Self {
        Self {
            user_id: user_id.into(),
            pool_id: pool_id.into(),
        }
    }
}

/// Everything one committed pull writes, applied atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullCommit {
    /// Audit record.
    pub result: PullResult,
    /// Ledger after the pull.
    pub ledger: PityState,
    /// `lifetime_pulls` of the ledger the pull was resolved against.
    pub expected_lifetime: u64,
    /// Item added to the owner's collection, if any.
    pub grant: Option<ItemId>,
}

/// What a commit did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The pull was recorded.
    Committed,
    /// The request id was already recorded; nothing changed.
    AlreadyCommitted(PullResult),
}

/// Durable state of the engine.
///
/// Implementations must apply [`commit`](PullStore::commit) atomically: result,
/// ledger and collection change together or not at all.
pub trait PullStore: Send + Sync {
    /// Committed result for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if the store cannot be read.
    fn find_result(&self, request_id: &str) -> StoreResult<Option<PullResult>>;

    /// Ledger for `key`; a fresh one if the user never pulled on the pool.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if the store cannot be read.
    fn load_ledger(&self, key: &LedgerKey) -> StoreResult<PityState>;

    /// Items `user_id` owns.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if the store cannot be read.
    fn owned_items(&self, user_id: &str) -> StoreResult<HashSet<ItemId>>;

    /// Records a pull.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`](crate::error::StoreError::Conflict) if the ledger's
    ///   `lifetime_pulls` no longer equals `expected_lifetime`
    /// - [`StoreError::Io`](crate::error::StoreError::Io) if the write was not durable
    fn commit(&self, commit: PullCommit) -> StoreResult<CommitOutcome>;

    /// Results for `key`, by ascending sequence number.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if the store cannot be read.
    fn results_for(&self, key: &LedgerKey) -> StoreResult<Vec<PullResult>>;

    /// Adds items to a collection outside of any pull.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if the write was not durable.
    fn grant_items(&self, user_id: &str, items: &[ItemId]) -> StoreResult<()>;
}
