//! In-memory store, optionally backed by a [`Journal`] or another [`CommitLog`].

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use fortuna_guard::UserId;
use fortuna_odds::{ItemId, PityState};

use super::{CommitOutcome, LedgerKey, PullCommit, PullStore};
use crate::error::{StoreError, StoreResult};
use crate::journal::{CommitLog, Journal, JournalEntry};
use crate::request::{PullResult, RequestId};

#[derive(Debug, Default)]
struct StoreState {
    results: HashMap<RequestId, PullResult>,
    by_sequence: BTreeMap<(LedgerKey, u64), RequestId>,
    ledgers: HashMap<LedgerKey, PityState>,
    collections: HashMap<UserId, HashSet<ItemId>>,
    /// Ledgers with a commit between check and apply.
    in_flight: HashSet<LedgerKey>,
    /// Request ids with a commit between check and apply.
    pending: HashSet<RequestId>,
}

impl StoreState {
    fn lifetime(&self, key: &LedgerKey) -> u64 {
        self.ledgers.get(key).map_or(0, |ledger| ledger.lifetime_pulls)
    }

    /// Checks that `commit` extends the ledger by exactly one pull.
    fn check(&self, commit: &PullCommit) -> StoreResult<()> {
        let key = commit.result.ledger_key();
        let found = self.lifetime(&key);
        if found != commit.expected_lifetime {
            return Err(StoreError::Conflict {
                user_id: key.user_id,
                pool_id: key.pool_id,
                expected: commit.expected_lifetime,
                found,
            });
        }
        let next = commit.expected_lifetime + 1;
        if commit.result.sequence_number != next || commit.ledger.lifetime_pulls != next {
            return Err(StoreError::Corrupt(format!(
                "commit for {} does not follow ledger {}/{} at {found}",
                commit.result.request_id, key.user_id, key.pool_id
            )));
        }
        Ok(())
    }

    /// Claims the ledger and request id of `commit` until [`Self::release`].
    fn reserve(&mut self, commit: &PullCommit) -> StoreResult<()> {
        let key = commit.result.ledger_key();
        if self.in_flight.contains(&key) || self.pending.contains(&commit.result.request_id) {
            return Err(StoreError::Busy(format!(
                "ledger {}/{} has a commit in flight",
                key.user_id, key.pool_id
            )));
        }
        self.check(commit)?;
        self.pending.insert(commit.result.request_id.clone());
        self.in_flight.insert(key);
        Ok(())
    }

    fn release(&mut self, commit: &PullCommit) {
        self.in_flight.remove(&commit.result.ledger_key());
        self.pending.remove(&commit.result.request_id);
    }

    fn apply(&mut self, commit: PullCommit) {
        let key = commit.result.ledger_key();
        let request_id = commit.result.request_id.clone();
        if let Some(item_id) = commit.grant {
            self.collections
                .entry(commit.result.user_id.clone())
                .or_default()
                .insert(item_id);
        }
        self.by_sequence
            .insert((key.clone(), commit.result.sequence_number), request_id.clone());
        self.ledgers.insert(key, commit.ledger);
        self.results.insert(request_id, commit.result);
    }

    fn grant(&mut self, user_id: &str, items: &[ItemId]) {
        self.collections
            .entry(user_id.to_string())
            .or_default()
            .extend(items.iter().copied());
    }
}

/// Thread-safe store.
///
/// A durable commit is checked and reserved under the state lock, appended to the
/// log with the lock released, then applied. The reservation keeps one commit per
/// ledger in flight, so each ledger's records reach the log in sequence order while
/// other ledgers keep committing and reading.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    log: Option<Box<dyn CommitLog>>,
}

impl MemoryStore {
    /// Creates a volatile store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that records every mutation to `log`.
    #[must_use]
    pub fn with_log(log: impl CommitLog + 'static) -> Self {
        Self {
            state: RwLock::default(),
            log: Some(Box::new(log)),
        }
    }

    /// Opens a durable store, replaying the journal at `path`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the journal cannot be opened
    /// - [`StoreError::Corrupt`] if the journal is damaged or a replayed record
    ///   contradicts the state before it
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let (journal, entries) = Journal::open(path)?;
        let mut state = StoreState::default();
        let replayed = entries.len();

        for entry in entries {
            match entry {
                JournalEntry::Pull(commit) => {
                    if state.results.contains_key(&commit.result.request_id) {
                        return Err(StoreError::Corrupt(format!(
                            "request {} journaled twice",
                            commit.result.request_id
                        )));
                    }
                    state.check(&commit)?;
                    state.apply(commit);
                }
                JournalEntry::Grant { user_id, items } => state.grant(&user_id, &items),
            }
        }

        tracing::info!(
            path = %journal.path().display(),
            records = replayed,
            results = state.results.len(),
            "pull store recovered"
        );

        Ok(Self {
            state: RwLock::new(state),
            log: Some(Box::new(journal)),
        })
    }

    /// Whether commits are journaled.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.log.is_some()
    }

    /// Number of committed results.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.state.read().results.len()
    }
}

impl PullStore for MemoryStore {
    fn find_result(&self, request_id: &str) -> StoreResult<Option<PullResult>> {
        Ok(self.state.read().results.get(request_id).cloned())
    }

    fn load_ledger(&self, key: &LedgerKey) -> StoreResult<PityState> {
        Ok(self.state.read().ledgers.get(key).cloned().unwrap_or_default())
    }

    fn owned_items(&self, user_id: &str) -> StoreResult<HashSet<ItemId>> {
        Ok(self.state.read().collections.get(user_id).cloned().unwrap_or_default())
    }

    fn commit(&self, commit: PullCommit) -> StoreResult<CommitOutcome> {
        let Some(log) = &self.log else {
            let mut state = self.state.write();
            if let Some(existing) = state.results.get(&commit.result.request_id) {
                return Ok(CommitOutcome::AlreadyCommitted(existing.clone()));
            }
            state.check(&commit)?;
            state.apply(commit);
            return Ok(CommitOutcome::Committed);
        };

        {
            let mut state = self.state.write();
            if let Some(existing) = state.results.get(&commit.result.request_id) {
                return Ok(CommitOutcome::AlreadyCommitted(existing.clone()));
            }
            state.reserve(&commit)?;
        }

        let appended = log.append(&JournalEntry::Pull(commit.clone()));

        let mut state = self.state.write();
        state.release(&commit);
        appended?;
        state.apply(commit);
        Ok(CommitOutcome::Committed)
    }

    fn results_for(&self, key: &LedgerKey) -> StoreResult<Vec<PullResult>> {
        let state = self.state.read();
        let start = (key.clone(), 0);
        let end = (key.clone(), u64::MAX);
        Ok(state
            .by_sequence
            .range(start..=end)
            .filter_map(|(_, request_id)| state.results.get(request_id).cloned())
            .collect())
    }

    fn grant_items(&self, user_id: &str, items: &[ItemId]) -> StoreResult<()> {
        // Collections only grow, so grants need no ordering against pulls.
        if let Some(log) = &self.log {
            log.append(&JournalEntry::Grant {
                user_id: user_id.to_string(),
                items: items.to_vec(),
            })?;
        }
        self.state.write().grant(user_id, items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, Sender};
    use fortuna_odds::Tier;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Holds every pull append for `user_id` until released.
    struct GatedLog {
        user_id: &'static str,
        entered: Sender<RequestId>,
        release: Receiver<()>,
    }

    impl CommitLog for GatedLog {
        fn append(&self, entry: &JournalEntry) -> StoreResult<u64> {
            if let JournalEntry::Pull(commit) = entry {
                if commit.result.user_id == self.user_id {
                    self.entered.send(commit.result.request_id.clone()).ok();
                    self.release.recv().ok();
                }
            }
            Ok(0)
        }
    }

    /// Fails its first append.
    #[derive(Default)]
    struct FlakyLog {
        failed: AtomicBool,
    }

    impl CommitLog for FlakyLog {
        fn append(&self, _: &JournalEntry) -> StoreResult<u64> {
            if self.failed.swap(true, Ordering::SeqCst) {
                Ok(1)
            } else {
                Err(StoreError::Io("disk full".into()))
            }
        }
    }

    fn temp_journal_path() -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("test_store_{id}.fjnl"))
    }

    fn commit(request_id: &str, seq: u64, item_id: ItemId) -> PullCommit {
        commit_for("user-1", request_id, seq, item_id)
    }

    fn commit_for(user_id: &str, request_id: &str, seq: u64, item_id: ItemId) -> PullCommit {
        PullCommit {
            result: PullResult {
                request_id: request_id.into(),
                user_id: user_id.into(),
                pool_id: "starter".into(),
                table_version: 1,
                pool_version: 1,
                outcome_tier: Tier::Common,
                item_id,
                pity_triggered: false,
                converted: false,
                timestamp: seq,
                sequence_number: seq,
            },
            ledger: PityState {
                lifetime_pulls: seq,
                table_version: Some(1),
                ..PityState::default()
            },
            expected_lifetime: seq - 1,
            grant: Some(item_id),
        }
    }

    #[test]
    fn test_commit_and_read_back() {
        let store = MemoryStore::new();
        assert!(!store.is_durable());
        assert_eq!(store.commit(commit("a", 1, 10)).unwrap(), CommitOutcome::Committed);
        assert_eq!(store.commit(commit("b", 2, 11)).unwrap(), CommitOutcome::Committed);

        let key = LedgerKey::new("user-1", "starter");
        assert_eq!(store.load_ledger(&key).unwrap().lifetime_pulls, 2);
        assert_eq!(store.owned_items("user-1").unwrap(), HashSet::from([10, 11]));
        let history: Vec<u64> = store.results_for(&key).unwrap().iter().map(|r| r.sequence_number).collect();
        assert_eq!(history, vec![1, 2]);
        assert!(store.results_for(&LedgerKey::new("user-1", "other")).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_request_is_not_applied_twice() {
        let store = MemoryStore::new();
        store.commit(commit("a", 1, 10)).unwrap();
        let again = store.commit(commit("a", 2, 99)).unwrap();
        match again {
            CommitOutcome::AlreadyCommitted(result) => assert_eq!(result.item_id, 10),
            CommitOutcome::Committed => panic!("committed twice"),
        }
        assert_eq!(store.result_count(), 1);
        assert!(!store.owned_items("user-1").unwrap().contains(&99));
    }

    #[test]
    fn test_stale_token_conflicts() {
        let store = MemoryStore::new();
        store.commit(commit("a", 1, 10)).unwrap();
        let err = store.commit(commit("b", 1, 11)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, found: 1, .. }));
        assert!(err.is_transient());
        assert_eq!(store.result_count(), 1);
    }

    #[test]
    fn test_sequence_gap_is_refused() {
        let store = MemoryStore::new();
        let mut gap = commit("a", 1, 10);
        gap.result.sequence_number = 5;
        assert!(matches!(store.commit(gap), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_durable_store_recovers() {
        let path = temp_journal_path();
        {
            let store = MemoryStore::open(&path).unwrap();
            store.commit(commit("a", 1, 10)).unwrap();
            store.grant_items("user-1", &[500, 501]).unwrap();
            store.commit(commit("b", 2, 11)).unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        assert!(store.is_durable());
        assert_eq!(store.result_count(), 2);
        assert_eq!(store.find_result("b").unwrap().unwrap().sequence_number, 2);
        assert_eq!(store.owned_items("user-1").unwrap(), HashSet::from([10, 11, 500, 501]));
        assert_eq!(store.load_ledger(&LedgerKey::new("user-1", "starter")).unwrap().lifetime_pulls, 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_slow_append_leaves_other_ledgers_free() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let store = Arc::new(MemoryStore::with_log(GatedLog {
            user_id: "slow",
            entered: entered_tx,
            release: release_rx,
        }));
        assert!(store.is_durable());

        let slow = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit(commit_for("slow", "s1", 1, 10)))
        };
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "s1");

        // "slow" is mid-append. Another ledger commits and reads meanwhile.
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                done_tx.send(store.commit(commit_for("fast", "f1", 1, 11))).ok();
            });
        }
        let fast = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fast.unwrap(), CommitOutcome::Committed);
        assert_eq!(store.owned_items("fast").unwrap(), HashSet::from([11]));
        assert!(store.find_result("s1").unwrap().is_none());

        // The held ledger and request id refuse a second commit until it lands.
        let same_key = store.commit(commit_for("slow", "s2", 1, 12)).unwrap_err();
        assert!(matches!(same_key, StoreError::Busy(_)));
        assert!(same_key.is_transient());
        let same_id = store.commit(commit_for("other", "s1", 1, 13)).unwrap_err();
        assert!(matches!(same_id, StoreError::Busy(_)));

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap().unwrap(), CommitOutcome::Committed);
        assert_eq!(store.load_ledger(&LedgerKey::new("slow", "starter")).unwrap().lifetime_pulls, 1);

        // Once applied, the next pull on that ledger goes through.
        release_tx.send(()).unwrap();
        assert_eq!(store.commit(commit_for("slow", "s2", 2, 12)).unwrap(), CommitOutcome::Committed);
    }

    #[test]
    fn test_failed_append_releases_the_ledger() {
        let store = MemoryStore::with_log(FlakyLog::default());
        let err = store.commit(commit("a", 1, 10)).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.result_count(), 0);
        assert!(store.owned_items("user-1").unwrap().is_empty());

        assert_eq!(store.commit(commit("a", 1, 10)).unwrap(), CommitOutcome::Committed);
        assert_eq!(store.result_count(), 1);
    }

    #[test]
    fn test_damaged_journal_refuses_to_open() {
        let path = temp_journal_path();
        {
            let store = MemoryStore::open(&path).unwrap();
            store.commit(commit("a", 1, 10)).unwrap();
            store.commit(commit("b", 2, 11)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[30] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(MemoryStore::open(&path), Err(StoreError::Corrupt(_))));
        std::fs::remove_file(&path).ok();
    }
}
