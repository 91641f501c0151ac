//! # Keyed Exclusive Sections
//!
//! One in-flight resolution per `(user, pool)`.
//!
//! ```text
//! key ──hash──> shard[i] ── Mutex<HashSet<held keys>> + Condvar
//! ```
//!
//! A shard's mutex is held only long enough to insert or remove a key; nobody
//! resolves a pull while holding it. Waiters park on the shard's condvar and
//! re-check their own key when woken, so unrelated keys never wait on each other's
//! critical sections.

use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::store::LedgerKey;

struct Shard {
    held: Mutex<HashSet<LedgerKey>>,
    released: Condvar,
}

/// Sharded table of held keys.
pub struct KeyedLocks {
    shards: Box<[Shard]>,
}

impl KeyedLocks {
    /// Creates a table with `shards` shards (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Shard {
                held: Mutex::new(HashSet::new()),
                released: Condvar::new(),
            })
            .collect();
        Self { shards }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, key: &LedgerKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    /// Acquires `key`, waiting at most `timeout`. Returns `None` on timeout.
    #[must_use]
    pub fn acquire(&self, key: &LedgerKey, timeout: Duration) -> Option<KeyGuard<'_>> {
        let shard = self.shard(key);
        let deadline = Instant::now() + timeout;
        let mut held = shard.held.lock();
        while held.contains(key) {
            if shard.released.wait_until(&mut held, deadline).timed_out() && held.contains(key) {
                return None;
            }
        }
        held.insert(key.clone());
        Some(KeyGuard {
            shard,
            key: key.clone(),
        })
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &LedgerKey) -> bool {
        self.shard(key).held.lock().contains(key)
    }
}

/// Releases its key on drop.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    shard: &'a Shard,
    key: LedgerKey,
}

impl KeyGuard<'_> {
    /// The held key.
    #[must_use]
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.shard.held.lock().remove(&self.key);
        self.shard.released.notify_all();
    }
}
