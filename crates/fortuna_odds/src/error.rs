//! # Odds Error Types
//!
//! All errors that can occur while publishing or resolving against the odds contract.

use thiserror::Error;

use crate::tier::Tier;

/// Errors raised by tables, pools, pity counters and the resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OddsError {
    /// A table or pool definition violates the published-odds contract.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every item of the resolved tier is owned and the pool has no conversion item.
    #[error("pool {pool_id} exhausted at tier {tier}: every item owned and no conversion item defined")]
    ExhaustedPool {
        /// Pool that ran dry.
        pool_id: String,
        /// Tier that was resolved.
        tier: Tier,
    },

    /// A pity counter reached its threshold without the guarantee firing.
    #[error("ledger corruption: {tier} counter at {count} with threshold {threshold}")]
    LedgerCorruption {
        /// Tier whose counter is out of range.
        tier: Tier,
        /// Counter value read from the ledger.
        count: u32,
        /// Threshold declared by the table.
        threshold: u32,
    },

    /// A table reached resolution with weights that do not sum to its declared total.
    #[error("weight sum mismatch in {pool_id} v{version}: declared {declared}, found {actual}")]
    WeightMismatch {
        /// Pool of the table.
        pool_id: String,
        /// Table version.
        version: u64,
        /// Declared total.
        declared: u64,
        /// Actual sum of weights.
        actual: u64,
    },

    /// The entropy source could not produce a draw.
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

impl OddsError {
    /// Returns true for integrity failures that need operator intervention.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::LedgerCorruption { .. } | Self::WeightMismatch { .. })
    }
}

/// Result type for odds operations.
pub type OddsResult<T> = Result<T, OddsError>;
