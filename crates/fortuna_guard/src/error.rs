//! # Guard Error Types
//!
//! Detector failures. Callers log these and treat the pull as not flagged.

use fortuna_odds::Tier;
use thiserror::Error;

/// Errors raised while analyzing a pull stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The table handed to the detector cannot describe an expected distribution.
    #[error("table {pool_id} v{version} unusable for analysis: {reason}")]
    InvalidTable {
        /// Pool of the table.
        pool_id: String,
        /// Table version.
        version: u64,
        /// What is wrong with it.
        reason: String,
    },

    /// An observed tier is not part of the table it was supposedly drawn from.
    #[error("tier {tier} observed on {pool_id} v{version}, which does not weight it")]
    UnknownTier {
        /// Pool of the table.
        pool_id: String,
        /// Table version.
        version: u64,
        /// Observed tier.
        tier: Tier,
    },
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;
