//! # Post-Commit Notifications
//!
//! ```text
//!   engine thread 1 ──┐
//!   engine thread 2 ──┼──> [channel] ──> [notifier thread] ──> monitor.observe
//!   engine thread N ──┘                        │
//!                                              └──> EventSink (bounded retries)
//! ```
//!
//! Nothing here runs inside an exclusive section. Monitor failures are logged
//! and the pull counts as not flagged. Delivery is at-least-once; consumers
//! dedupe on `requestId`.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fortuna_guard::AntiGamingMonitor;
use fortuna_odds::ProbabilityTable;

use crate::error::SinkError;
use crate::request::PullResult;
use crate::signal::Completion;

/// Outbound event for analytics and review tooling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullCommitted {
    /// The committed result.
    #[serde(flatten)]
    pub result: PullResult,
    /// Whether the monitor had the account flagged after this pull.
    pub flagged_for_review: bool,
}

/// Destination of [`PullCommitted`] events.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the event was not accepted; it will be retried.
    fn publish(&self, event: &PullCommitted) -> Result<(), SinkError>;
}

/// Sink backed by a channel, for in-process consumers.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: Sender<PullCommitted>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn new() -> (Self, Receiver<PullCommitted>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &PullCommitted) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }
}

enum Job {
    Committed {
        result: PullResult,
        table: Arc<ProbabilityTable>,
    },
    Flush(Arc<Completion<()>>),
}

/// Delivery settings of a notifier.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryPolicy {
    /// Attempts per event.
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

/// Background worker feeding the monitor and the event sink.
pub struct Notifier {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Starts the worker thread.
    #[must_use]
    pub fn start(
        monitor: Arc<AntiGamingMonitor>,
        sink: Option<Arc<dyn EventSink>>,
        policy: DeliveryPolicy,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("fortuna-notifier".to_string())
            .spawn(move || Self::worker_loop(&receiver, &monitor, sink.as_deref(), policy));

        match worker {
            Ok(worker) => Self {
                sender: Some(sender),
                worker: Some(worker),
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to start notifier thread, notifications disabled");
                Self {
                    sender: None,
                    worker: None,
                }
            }
        }
    }

    fn worker_loop(
        receiver: &Receiver<Job>,
        monitor: &AntiGamingMonitor,
        sink: Option<&dyn EventSink>,
        policy: DeliveryPolicy,
    ) {
        for job in receiver {
            match job {
                Job::Committed { result, table } => {
                    let flagged_for_review = match monitor.observe(
                        &result.user_id,
                        &table,
                        result.outcome_tier,
                        result.pity_triggered,
                        result.timestamp,
                    ) {
                        Ok(verdict) => verdict.flagged,
                        Err(e) => {
                            tracing::warn!(request_id = %result.request_id, error = %e, "anti-gaming observation failed");
                            false
                        }
                    };

                    if let Some(sink) = sink {
                        Self::deliver(sink, &PullCommitted { result, flagged_for_review }, policy);
                    }
                }
                Job::Flush(done) => done.complete(()),
            }
        }
    }

    fn deliver(sink: &dyn EventSink, event: &PullCommitted, policy: DeliveryPolicy) {
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            match sink.publish(event) {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    tracing::warn!(request_id = %event.result.request_id, attempt, error = %e, "event delivery failed, retrying");
                    thread::sleep(policy.backoff);
                }
                Err(e) => {
                    tracing::error!(request_id = %event.result.request_id, attempts, error = %e, "event dropped");
                }
            }
        }
    }

    /// Queues a committed pull. Never blocks.
    pub fn notify(&self, result: PullResult, table: Arc<ProbabilityTable>) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(Job::Committed { result, table }).is_err() {
            tracing::warn!("notifier stopped, notification dropped");
        }
    }

    /// Waits until everything queued before this call is processed.
    /// Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(sender) = &self.sender else {
            return true;
        };
        let done = Arc::new(Completion::new());
        if sender.send(Job::Flush(Arc::clone(&done))).is_err() {
            return false;
        }
        done.wait_timeout(timeout).is_some()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue drains.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
