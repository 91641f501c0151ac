//! # Pull Error Types
//!
//! Internal errors of the persistence and engine layers, and the external error
//! codes they translate to at the service boundary.
//!
//! | Class        | Retried by engine | Example                           |
//! |--------------|-------------------|-----------------------------------|
//! | Request      | no                | malformed id, unknown pool        |
//! | Config       | no                | pool lacks items for a tier       |
//! | Transient    | yes, with backoff | lock timeout, ledger conflict     |
//! | Integrity    | no, logged        | ledger corruption, weight drift   |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fortuna_odds::OddsError;

/// Errors raised by a [`PullStore`](crate::store::PullStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is momentarily unable to serve the call.
    #[error("store busy: {0}")]
    Busy(String),

    /// The ledger changed between read and commit.
    #[error("ledger conflict on {user_id}/{pool_id}: expected {expected} lifetime pulls, found {found}")]
    Conflict {
        /// Ledger owner.
        user_id: String,
        /// Ledger pool.
        pool_id: String,
        /// Token read before resolution.
        expected: u64,
        /// Token found at commit.
        found: u64,
    },

    /// Durable write failed; nothing was applied.
    #[error("journal I/O failed: {0}")]
    Io(String),

    /// Persisted state cannot be trusted; the store refuses further commits.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Conflict { .. } | Self::Io(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the economy collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpendError {
    /// The spend confirmation does not authorize this pull.
    #[error("spend rejected: {0}")]
    Rejected(String),

    /// The collaborator could not be reached.
    #[error("spend verifier unavailable: {0}")]
    Unavailable(String),
}

/// An event could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event delivery failed: {0}")]
pub struct SinkError(pub String);

/// Errors raised while executing a pull.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PullError {
    /// The request is malformed or names an unknown pool or table version.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The service configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Odds contract failure: catalog defect, exhausted pool or integrity breach.
    #[error(transparent)]
    Odds(#[from] OddsError),

    /// The economy collaborator rejected the spend confirmation.
    #[error("upstream spend invalid: {0}")]
    UpstreamSpendInvalid(String),

    /// The economy collaborator could not be reached.
    #[error("spend verification unavailable: {0}")]
    SpendUnavailable(String),

    /// The `(user, pool)` exclusive section was not acquired in time.
    #[error("timed out waiting for {user_id}/{pool_id}")]
    LockTimeout {
        /// Ledger owner.
        user_id: String,
        /// Ledger pool.
        pool_id: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Retries exhausted; safe to resubmit with the same request id.
    #[error("transient failure after {attempts} attempts: {reason}")]
    Transient {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// The account is flagged and pulling faster than allowed.
    #[error("rate limited, retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until a pull would be admitted.
        retry_after_ms: u64,
    },

    /// The service is shutting down or its queue is full.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<SpendError> for PullError {
    fn from(err: SpendError) -> Self {
        match err {
            SpendError::Rejected(reason) => Self::UpstreamSpendInvalid(reason),
            SpendError::Unavailable(reason) => Self::SpendUnavailable(reason),
        }
    }
}

impl PullError {
    /// Returns true if the engine should retry the attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. } | Self::SpendUnavailable(_) => true,
            Self::Store(err) => err.is_transient(),
            Self::Odds(OddsError::Entropy(_)) => true,
            _ => false,
        }
    }

    /// Returns true for integrity failures that need operator intervention.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        match self {
            Self::Odds(err) => err.is_integrity(),
            Self::Store(StoreError::Corrupt(_)) => true,
            _ => false,
        }
    }

    /// External code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidConfig(_) => ErrorCode::ConfigError,
            Self::Odds(err) => match err {
                OddsError::Config(_) | OddsError::WeightMismatch { .. } => ErrorCode::ConfigError,
                OddsError::ExhaustedPool { .. } => ErrorCode::ExhaustedPool,
                OddsError::LedgerCorruption { .. } => ErrorCode::LedgerCorruption,
                OddsError::Entropy(_) => ErrorCode::Transient,
            },
            Self::UpstreamSpendInvalid(_) => ErrorCode::UpstreamSpendInvalid,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::SpendUnavailable(_)
            | Self::LockTimeout { .. }
            | Self::Store(_)
            | Self::Transient { .. }
            | Self::Unavailable(_) => ErrorCode::Transient,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, PullError>;

/// Error codes exposed at the service boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request; fix and resend.
    InvalidRequest,
    /// Catalog or configuration defect.
    ConfigError,
    /// Every candidate owned and no conversion item.
    ExhaustedPool,
    /// Pity ledger failed its integrity check.
    LedgerCorruption,
    /// Spend confirmation rejected by the economy.
    UpstreamSpendInvalid,
    /// Retry with the same request id.
    Transient,
    /// Flagged account throttled.
    RateLimited,
}
