//! # Pull Service
//!
//! The inbound boundary. Adds what the engine deliberately leaves out:
//!
//! - admission: flagged accounts pulling faster than the configured spacing get
//!   `RATE_LIMITED`, never a different outcome
//! - a fixed worker pool for callers that submit and wait with a timeout
//! - translation of internal errors into wire codes
//!
//! An abandoned ticket does not cancel its pull. The result stays retrievable by
//! request id.

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fortuna_guard::Admission;
use fortuna_odds::{ItemId, Tier};

use crate::engine::PullEngine;
use crate::error::{EngineResult, ErrorCode, PullError};
use crate::request::{PullRequest, PullResult, RequestId};
use crate::signal::Completion;

/// Successful wire response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Request that produced it.
    pub request_id: RequestId,
    /// Tier reached.
    pub outcome_tier: Tier,
    /// Item awarded.
    pub item_id: ItemId,
    /// Whether the pity guarantee forced it.
    pub pity_triggered: bool,
    /// Position in the `(user, pool)` history.
    pub sequence_number: u64,
    /// Commit time, ms since the Unix epoch.
    pub timestamp: u64,
}

impl From<&PullResult> for PullResponse {
    fn from(result: &PullResult) -> Self {
        Self {
            request_id: result.request_id.clone(),
            outcome_tier: result.outcome_tier,
            item_id: result.item_id,
            pity_triggered: result.pity_triggered,
            sequence_number: result.sequence_number,
            timestamp: result.timestamp,
        }
    }
}

/// Error wire response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// Present on `RATE_LIMITED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&PullError> for ErrorBody {
    fn from(err: &PullError) -> Self {
        let retry_after_ms = match err {
            PullError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            retry_after_ms,
        }
    }
}

type Slot = Arc<Completion<EngineResult<PullResult>>>;

struct Job {
    request: PullRequest,
    done: Slot,
}

/// Handle to a submitted pull.
#[derive(Clone)]
pub struct PullTicket {
    request_id: RequestId,
    done: Slot,
}

impl PullTicket {
    /// Request the ticket tracks.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Blocks until the pull finishes.
    ///
    /// # Errors
    ///
    /// Returns the pull's error.
    pub fn wait(&self) -> EngineResult<PullResult> {
        self.done.wait()
    }

    /// Waits at most `timeout`. `None` means still running; the pull is not
    /// cancelled and its result can be fetched later with
    /// [`PullService::lookup`].
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<EngineResult<PullResult>> {
        self.done.wait_timeout(timeout)
    }

    /// Whether the pull has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.peek().is_some()
    }
}

impl std::fmt::Debug for PullTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullTicket")
            .field("request_id", &self.request_id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Inbound pull boundary over a [`PullEngine`].
pub struct PullService {
    engine: Arc<PullEngine>,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl PullService {
    /// Wraps `engine` and starts `service_workers` threads.
    #[must_use]
    pub fn new(engine: PullEngine) -> Self {
        let engine = Arc::new(engine);
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(engine.config().max_pending.max(1));

        let mut workers = Vec::with_capacity(engine.config().service_workers);
        for index in 0..engine.config().service_workers {
            let engine = Arc::clone(&engine);
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("fortuna-pull-{index}"))
                .spawn(move || {
                    for job in &receiver {
                        job.done.complete(admit_and_execute(&engine, &job.request));
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(index, error = %e, "failed to start pull worker"),
            }
        }

        let jobs = if workers.is_empty() {
            tracing::error!("no pull workers running, submissions disabled");
            None
        } else {
            Some(sender)
        };

        Self { engine, jobs, workers }
    }

    /// Executes a pull on the calling thread.
    ///
    /// # Errors
    ///
    /// [`PullError::RateLimited`] for throttled accounts, otherwise whatever
    /// [`PullEngine::execute_pull`] returns.
    pub fn pull(&self, request: &PullRequest) -> EngineResult<PullResult> {
        admit_and_execute(&self.engine, request)
    }

    /// Executes a pull and translates the outcome into wire bodies.
    ///
    /// # Errors
    ///
    /// Returns the [`ErrorBody`] for any failure.
    pub fn handle(&self, request: &PullRequest) -> Result<PullResponse, ErrorBody> {
        self.pull(request).map(|result| PullResponse::from(&result)).map_err(|err| {
            if err.code() == ErrorCode::Transient {
                tracing::warn!(request_id = %request.request_id, error = %err, "pull failed transiently");
            }
            ErrorBody::from(&err)
        })
    }

    /// Queues a pull for the worker pool.
    ///
    /// # Errors
    ///
    /// - [`PullError::InvalidRequest`] for malformed requests
    /// - [`PullError::Unavailable`] if the queue is full or the service is stopping
    pub fn submit(&self, request: PullRequest) -> EngineResult<PullTicket> {
        request.validate()?;
        let Some(jobs) = &self.jobs else {
            return Err(PullError::Unavailable("no pull workers running".to_string()));
        };

        let done: Slot = Arc::new(Completion::new());
        let ticket = PullTicket {
            request_id: request.request_id.clone(),
            done: Arc::clone(&done),
        };
        match jobs.try_send(Job { request, done }) {
            Ok(()) => Ok(ticket),
            Err(TrySendError::Full(_)) => Err(PullError::Unavailable("pull queue full".to_string())),
            Err(TrySendError::Disconnected(_)) => Err(PullError::Unavailable("service stopping".to_string())),
        }
    }

    /// Committed result for `request_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn lookup(&self, request_id: &str) -> EngineResult<Option<PullResult>> {
        self.engine.lookup(request_id)
    }

    /// Pull history of `user_id` on `pool_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Store`] if the store cannot be read.
    pub fn history(&self, user_id: &str, pool_id: &str) -> EngineResult<Vec<PullResult>> {
        self.engine.history(user_id, pool_id)
    }

    /// The wrapped engine.
    #[must_use]
    pub fn engine(&self) -> &PullEngine {
        &self.engine
    }
}

impl Drop for PullService {
    fn drop(&mut self) {
        // Queued pulls still run; workers exit once the queue is empty.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn admit_and_execute(engine: &PullEngine, request: &PullRequest) -> EngineResult<PullResult> {
    request.validate()?;

    // Replays are never throttled: the client already paid for this one.
    if engine.lookup(&request.request_id)?.is_none() {
        if let Admission::Throttle { retry_after_ms } = engine.monitor().admission(&request.user_id, engine.clock().now_ms()) {
            tracing::debug!(request_id = %request.request_id, user_id = %request.user_id, retry_after_ms, "pull throttled");
            return Err(PullError::RateLimited { retry_after_ms });
        }
    }

    engine.execute_pull(request)
}
