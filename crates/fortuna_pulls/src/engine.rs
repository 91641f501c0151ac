//! # Pull Engine
//!
//! Orchestrates one paid pull end to end. Resolution itself is the pure
//! [`resolve`] function; this module owns everything around it: idempotency,
//! the `(user, pool)` exclusive section, the atomic commit and the retry policy.
//!
//! ## Retry policy
//!
//! | Failure                         | Action                              |
//! |---------------------------------|-------------------------------------|
//! | lock timeout, conflict, busy    | back off, retry the whole attempt   |
//! | retries exhausted               | `Transient`; resubmit with same id  |
//! | ledger corruption, weight drift | fail immediately, `error!`          |
//! | anything else                   | fail immediately                    |
//!
//! A failed attempt commits nothing, so a retry starts from the store's state.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fortuna_guard::AntiGamingMonitor;
use fortuna_odds::{resolve, Banner, Catalog, DrawSource, ItemId, OsEntropy, PityState};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineResult, PullError};
use crate::events::{DeliveryPolicy, EventSink, Notifier};
use crate::locks::KeyedLocks;
use crate::request::{PullRequest, PullResult};
use crate::spend::{SpendVerifier, TokenFormatVerifier};
use crate::store::{CommitOutcome, LedgerKey, MemoryStore, PullCommit, PullStore};

/// Executes pulls against a catalog and a store.
pub struct PullEngine {
    catalog: Arc<Catalog>,
    store: Arc<dyn PullStore>,
    draws: Arc<dyn DrawSource>,
    spend: Arc<dyn SpendVerifier>,
    clock: Arc<dyn Clock>,
    monitor: Arc<AntiGamingMonitor>,
    locks: KeyedLocks,
    config: EngineConfig,
    // Dropped last: joining the worker drains pending notifications.
    notifier: Notifier,
}

impl PullEngine {
    /// Starts a builder over `catalog`.
    #[must_use]
    pub fn builder(catalog: Arc<Catalog>) -> PullEngineBuilder {
        PullEngineBuilder::new(catalog)
    }

    /// Executes one pull.
    ///
    /// Replaying a committed `request_id` returns the original result without
    /// drawing, verifying spend again or touching the ledger.
    ///
    /// # Errors
    ///
    /// - [`PullError::InvalidRequest`] for malformed requests, unknown pools or pins,
    ///   and request ids reused for another user or pool
    /// - [`PullError::UpstreamSpendInvalid`] if the spend confirmation is refused
    /// - [`PullError::Odds`] for catalog defects, exhausted pools and integrity breaches
    /// - [`PullError::Transient`] once retries are exhausted; nothing was committed
    pub fn execute_pull(&self, request: &PullRequest) -> EngineResult<PullResult> {
        request.validate()?;

        // Committed pulls replay even after their pool or pin is withdrawn.
        if let Some(existing) = self.replay(request)? {
            return Ok(existing);
        }

        let banner = self.catalog.banner(&request.pool_id, request.table_version)?.ok_or_else(|| {
            PullError::InvalidRequest(match request.table_version {
                Some(version) => format!("pool {} has no table version {version}", request.pool_id),
                None => format!("unknown pool {}", request.pool_id),
            })
        })?;

        let attempts = self.config.commit_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request, &banner) {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.config.backoff(attempt - 1);
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "pull attempt failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(request_id = %request.request_id, attempts, error = %err, "pull retries exhausted");
                    return Err(PullError::Transient {
                        attempts,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    if err.is_integrity() {
                        tracing::error!(
                            request_id = %request.request_id,
                            user_id = %request.user_id,
                            pool_id = %request.pool_id,
                            error = %err,
                            "integrity failure, pull refused"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    fn attempt(&self, request: &PullRequest, banner: &Banner) -> EngineResult<PullResult> {
        if let Some(existing) = self.replay(request)? {
            return Ok(existing);
        }

        self.spend.verify(request)?;

        let key = request.ledger_key();
        let guard = self
            .locks
            .acquire(&key, self.config.lock_timeout())
            .ok_or_else(|| PullError::LockTimeout {
                user_id: key.user_id.clone(),
                pool_id: key.pool_id.clone(),
            })?;

        // A concurrent duplicate may have committed while we waited.
        if let Some(existing) = self.replay(request)? {
            return Ok(existing);
        }

        let ledger = self.store.load_ledger(&key)?;
        ledger.check_integrity(&banner.table)?;
        let owned = self.store.owned_items(&request.user_id)?;

        let draw = self.draws.next_draw()?;
        let outcome = resolve(&banner.table, &banner.pool, &ledger, &owned, draw)?;

        let result = PullResult {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            pool_id: request.pool_id.clone(),
            table_version: banner.table.version,
            pool_version: banner.pool.version,
            outcome_tier: outcome.tier,
            item_id: outcome.item_id,
            pity_triggered: outcome.pity_triggered,
            converted: outcome.converted,
            timestamp: self.clock.now_ms(),
            sequence_number: ledger.lifetime_pulls + 1,
        };

        let commit = PullCommit {
            result: result.clone(),
            ledger: ledger.advance(&banner.table, outcome.tier),
            expected_lifetime: ledger.lifetime_pulls,
            grant: (!outcome.converted).then_some(outcome.item_id),
        };

        let committed = match self.store.commit(commit)? {
            CommitOutcome::Committed => result,
            CommitOutcome::AlreadyCommitted(existing) => return Self::replayable(request, existing),
        };
        drop(guard);

        tracing::debug!(
            request_id = %committed.request_id,
            user_id = %committed.user_id,
            pool_id = %committed.pool_id,
            tier = %committed.outcome_tier,
            item_id = committed.item_id,
            sequence = committed.sequence_number,
            pity = committed.pity_triggered,
            "pull committed"
        );

        self.notifier.notify(committed.clone(), Arc::clone(&banner.table));
        Ok(committed)
    }

    fn replay(&self, request: &PullRequest) -> EngineResult<Option<PullResult>> {
        self.store
            .find_result(&request.request_id)?
            .map(|existing| Self::replayable(request, existing))
            .transpose()
    }

    /// `existing` if it was committed for the same user and pool as `request`.
    fn replayable(request: &PullRequest, existing: PullResult) -> EngineResult<PullResult> {
        if request.matches(&existing) {
            Ok(existing)
        } else {
            Err(PullError::InvalidRequest(format!(
                "requestId {} was already used for another user or pool",
                request.request_id
            )))
        }
    }

    /// Committed result for `request_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn lookup(&self, request_id: &str) -> EngineResult<Option<PullResult>> {
        Ok(self.store.find_result(request_id)?)
    }

    /// Pull history of `user_id` on `pool_id`, by ascending sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn history(&self, user_id: &str, pool_id: &str) -> EngineResult<Vec<PullResult>> {
        Ok(self.store.results_for(&LedgerKey::new(user_id, pool_id))?)
    }

    /// Current pity ledger of `user_id` on `pool_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn ledger(&self, user_id: &str, pool_id: &str) -> EngineResult<PityState> {
        Ok(self.store.load_ledger(&LedgerKey::new(user_id, pool_id))?)
    }

    /// Items `user_id` owns.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn owned_items(&self, user_id: &str) -> EngineResult<HashSet<ItemId>> {
        Ok(self.store.owned_items(user_id)?)
    }

    /// Adds items to a collection outside of any pull (migrations, support grants).
    ///
    /// # Errors
    ///
    /// - [`PullError::InvalidRequest`] if `user_id` is empty
    /// - [`PullError::Store`] if the grant was not persisted
    pub fn grant_items(&self, user_id: &str, items: &[ItemId]) -> EngineResult<()> {
        if user_id.is_empty() {
            return Err(PullError::InvalidRequest("userId is empty".to_string()));
        }
        self.store.grant_items(user_id, items)?;
        tracing::info!(user_id, count = items.len(), "items granted");
        Ok(())
    }

    /// Waits until every committed pull so far has reached the monitor and sink.
    /// Returns false on timeout.
    pub fn flush_notifications(&self, timeout: Duration) -> bool {
        self.notifier.flush(timeout)
    }

    /// The anti-gaming monitor fed by this engine.
    #[must_use]
    pub fn monitor(&self) -> &Arc<AntiGamingMonitor> {
        &self.monitor
    }

    /// The clock stamping results.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The catalog pulls resolve against.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Engine tuning.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Assembles a [`PullEngine`].
///
/// Defaults: volatile [`MemoryStore`], [`OsEntropy`], [`TokenFormatVerifier`],
/// [`SystemClock`], a default monitor and no event sink.
pub struct PullEngineBuilder {
    catalog: Arc<Catalog>,
    store: Option<Arc<dyn PullStore>>,
    draws: Option<Arc<dyn DrawSource>>,
    spend: Option<Arc<dyn SpendVerifier>>,
    clock: Option<Arc<dyn Clock>>,
    monitor: Option<Arc<AntiGamingMonitor>>,
    sink: Option<Arc<dyn EventSink>>,
    config: EngineConfig,
}

impl PullEngineBuilder {
    /// Starts a builder over `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            store: None,
            draws: None,
            spend: None,
            clock: None,
            monitor: None,
            sink: None,
            config: EngineConfig::default(),
        }
    }

    /// Persistence backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PullStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Draw source. Only [`OsEntropy`] belongs in production.
    #[must_use]
    pub fn draws(mut self, draws: Arc<dyn DrawSource>) -> Self {
        self.draws = Some(draws);
        self
    }

    /// Economy collaborator.
    #[must_use]
    pub fn spend_verifier(mut self, spend: Arc<dyn SpendVerifier>) -> Self {
        self.spend = Some(spend);
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Anti-gaming monitor, shared with whatever reviews its reports.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<AntiGamingMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Destination of [`PullCommitted`](crate::events::PullCommitted) events.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Engine tuning.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine and starts its notifier thread.
    #[must_use]
    pub fn build(self) -> PullEngine {
        let monitor = self.monitor.unwrap_or_default();
        let policy = DeliveryPolicy {
            attempts: self.config.delivery_attempts,
            backoff: Duration::from_millis(self.config.delivery_backoff_ms),
        };
        let notifier = Notifier::start(Arc::clone(&monitor), self.sink, policy);

        PullEngine {
            catalog: self.catalog,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            draws: self.draws.unwrap_or_else(|| Arc::new(OsEntropy)),
            spend: self.spend.unwrap_or_else(|| Arc::new(TokenFormatVerifier::default())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            monitor,
            locks: KeyedLocks::new(self.config.lock_shards),
            config: self.config,
            notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorCode, SpendError};
    use fortuna_odds::{ProbabilityTable, RewardItem, RewardPool, ScriptedDraws, Tier, TierWeight};

    fn catalog() -> Arc<Catalog> {
        let catalog = Catalog::new();
        catalog
            .publish_pool(RewardPool::new(
                "starter",
                1,
                vec![RewardItem::new(1, Tier::Common), RewardItem::new(2, Tier::Rare)],
            ))
            .unwrap();
        catalog
            .publish_table(
                ProbabilityTable::new(
                    "starter",
                    1,
                    1,
                    vec![TierWeight::new(Tier::Common, 900_000), TierWeight::new(Tier::Rare, 100_000)],
                )
                .with_pity(Tier::Rare, 3),
            )
            .unwrap();
        Arc::new(catalog)
    }

    fn engine(draws: Arc<ScriptedDraws>) -> PullEngine {
        PullEngine::builder(catalog())
            .draws(draws)
            .clock(Arc::new(ManualClock::new(1_000)))
            .build()
    }

    fn request(id: &str) -> PullRequest {
        PullRequest::new(id, "user-1", "starter", "tok_0123456789")
    }

    #[test]
    fn test_pull_commits_with_sequence_and_timestamp() {
        let engine = engine(Arc::new(ScriptedDraws::new([0, 0])));
        let first = engine.execute_pull(&request("a")).unwrap();
        let second = engine.execute_pull(&request("b")).unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(first.timestamp, 1_000);
        assert_eq!(first.outcome_tier, Tier::Common);
        assert_eq!(engine.ledger("user-1", "starter").unwrap().count(Tier::Rare), 2);
        assert_eq!(engine.history("user-1", "starter").unwrap().len(), 2);
    }

    #[test]
    fn test_replay_does_not_draw() {
        let draws = Arc::new(ScriptedDraws::new([0]));
        let engine = engine(Arc::clone(&draws));
        let first = engine.execute_pull(&request("a")).unwrap();
        let again = engine.execute_pull(&request("a")).unwrap();
        assert_eq!(first, again);
        assert_eq!(draws.remaining(), 0);
        assert_eq!(engine.history("user-1", "starter").unwrap().len(), 1);
    }

    #[test]
    fn test_reused_id_for_other_pool_is_invalid() {
        let engine = engine(Arc::new(ScriptedDraws::new([0])));
        engine.execute_pull(&request("a")).unwrap();
        let mut other = request("a");
        other.user_id = "user-2".into();
        assert_eq!(engine.execute_pull(&other).unwrap_err().code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_unknown_pool_and_pin() {
        let engine = engine(Arc::new(ScriptedDraws::default()));
        let unknown = PullRequest::new("a", "user-1", "nope", "tok_0123456789");
        assert_eq!(engine.execute_pull(&unknown).unwrap_err().code(), ErrorCode::InvalidRequest);
        let pinned = request("b").pinned(7);
        assert_eq!(engine.execute_pull(&pinned).unwrap_err().code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_replay_outlives_withdrawn_pool() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        clock.set(86_400_000);
        let first = PullEngine::builder(catalog())
            .store(store.clone())
            .draws(Arc::new(ScriptedDraws::new([0])))
            .clock(clock)
            .build()
            .execute_pull(&request("a"))
            .unwrap();
        assert_eq!(first.timestamp, 86_400_000);

        // Same store, pool no longer published.
        let withdrawn = PullEngine::builder(Arc::new(Catalog::new())).store(store).build();
        assert_eq!(withdrawn.execute_pull(&request("a")).unwrap(), first);
        assert_eq!(withdrawn.execute_pull(&request("a").pinned(9)).unwrap(), first);
        assert_eq!(
            withdrawn.execute_pull(&request("b")).unwrap_err().code(),
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_pity_forces_third_pull() {
        // Threshold 3: pulls 1 and 2 are Common, pull 3 is forced to Rare.
        let engine = engine(Arc::new(ScriptedDraws::new([0, 0, 0])));
        engine.execute_pull(&request("a")).unwrap();
        engine.execute_pull(&request("b")).unwrap();
        let third = engine.execute_pull(&request("c")).unwrap();
        assert_eq!(third.outcome_tier, Tier::Rare);
        assert!(third.pity_triggered);
        assert_eq!(engine.ledger("user-1", "starter").unwrap().count(Tier::Rare), 0);
    }

    #[test]
    fn test_rejected_spend_touches_nothing() {
        struct Refuse;
        impl SpendVerifier for Refuse {
            fn verify(&self, _: &PullRequest) -> Result<(), SpendError> {
                Err(SpendError::Rejected("insufficient funds".into()))
            }
        }

        let draws = Arc::new(ScriptedDraws::new([0]));
        let engine = PullEngine::builder(catalog())
            .draws(draws.clone())
            .spend_verifier(Arc::new(Refuse))
            .build();
        let err = engine.execute_pull(&request("a")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamSpendInvalid);
        assert_eq!(draws.remaining(), 1);
        assert!(engine.lookup("a").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_ledger_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let engine = PullEngine::builder(catalog())
            .store(store.clone())
            .draws(Arc::new(ScriptedDraws::new([0, 0])))
            .build();
        engine.execute_pull(&request("a")).unwrap();

        // Forge an overdue counter under the same table version.
        let key = LedgerKey::new("user-1", "starter");
        let ledger = store.load_ledger(&key).unwrap();
        let mut forged = ledger.clone().with_count(Tier::Rare, 3);
        forged.lifetime_pulls = 2;
        let mut result = engine.lookup("a").unwrap().unwrap();
        result.request_id = "forged".into();
        result.sequence_number = 2;
        store
            .commit(PullCommit {
                result,
                ledger: forged,
                expected_lifetime: 1,
                grant: None,
            })
            .unwrap();

        let err = engine.execute_pull(&request("b")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::LedgerCorruption);
        assert!(engine.lookup("b").unwrap().is_none());
    }

    #[test]
    fn test_converted_award_is_not_granted() {
        let catalog = Catalog::new();
        catalog
            .publish_pool(
                RewardPool::new("limited", 1, vec![RewardItem::new(1, Tier::Common)])
                    .excluding_owned(Some(9_000)),
            )
            .unwrap();
        catalog
            .publish_table(ProbabilityTable::new(
                "limited",
                1,
                1,
                vec![TierWeight::new(Tier::Common, 1_000_000)],
            ))
            .unwrap();

        let engine = PullEngine::builder(Arc::new(catalog))
            .draws(Arc::new(ScriptedDraws::new([0, 0])))
            .build();
        let pull = |id: &str| engine.execute_pull(&PullRequest::new(id, "user-1", "limited", "tok_0123456789"));

        assert_eq!(pull("a").unwrap().item_id, 1);
        let second = pull("b").unwrap();
        assert!(second.converted);
        assert_eq!(second.item_id, 9_000);
        assert_eq!(engine.owned_items("user-1").unwrap(), HashSet::from([1]));
    }
}
