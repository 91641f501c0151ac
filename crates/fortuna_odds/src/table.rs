//! # Probability Tables
//!
//! **Versioned, immutable integer odds**
//!
//! A table declares, in order, the weight of every tier a pool can award.
//! Weights are integers that sum exactly to `total_weight`, so a draw maps onto
//! `[0, total_weight)` the same way on every platform.
//!
//! ```text
//! weights:   Common 700000 | Rare 290000 | Legendary 10000
//! intervals: [0, 700000)   | [700000, 990000) | [990000, 1000000)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{OddsError, OddsResult};
use crate::tier::Tier;

/// Identifier of a reward pool (banner), supplied by content management.
pub type PoolId = String;

/// Default declared total of a table's weights.
pub const DEFAULT_TOTAL_WEIGHT: u32 = 1_000_000;

const fn default_total_weight() -> u32 {
    DEFAULT_TOTAL_WEIGHT
}

/// Weight of one tier within a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierWeight {
    /// The tier.
    pub tier: Tier,
    /// Integer weight, out of the table's total.
    pub weight: u32,
}

impl TierWeight {
    /// Creates a tier weight.
    #[inline]
    #[must_use]
    pub const fn new(tier: Tier, weight: u32) -> Self {
        Self { tier, weight }
    }
}

/// Guarantee rule: the `threshold`-th consecutive pull without `tier` or better is forced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PityRule {
    /// Tier guaranteed by this rule.
    pub tier: Tier,
    /// Pull count at which the guarantee fires.
    pub threshold: u32,
}

impl PityRule {
    /// Creates a pity rule.
    #[inline]
    #[must_use]
    pub const fn new(tier: Tier, threshold: u32) -> Self {
        Self { tier, threshold }
    }
}

/// Half-open cumulative interval `[low, high)` owned by one tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierInterval {
    /// The tier.
    pub tier: Tier,
    /// Inclusive lower bound.
    pub low: u64,
    /// Exclusive upper bound.
    pub high: u64,
}

impl TierInterval {
    /// Returns true if `roll` falls inside this interval.
    #[inline]
    #[must_use]
    pub const fn contains(&self, roll: u64) -> bool {
        roll >= self.low && roll < self.high
    }
}

/// A published probability table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityTable {
    /// Pool this table prices.
    pub pool_id: PoolId,
    /// Table version (strictly increasing per pool).
    pub version: u64,
    /// Version of the reward pool this table is paired with.
    pub pool_version: u64,
    /// Tier weights, in declared order.
    pub weights: Vec<TierWeight>,
    /// Declared sum of all weights.
    #[serde(default = "default_total_weight")]
    pub total_weight: u32,
    /// Pity guarantees, independent counters per tier.
    #[serde(default)]
    pub pity: Vec<PityRule>,
}

impl ProbabilityTable {
    /// Creates a table with the default total and no pity rules.
    #[must_use]
    pub fn new(pool_id: impl Into<PoolId>, version: u64, pool_version: u64, weights: Vec<TierWeight>) -> Self {
        Self {
            pool_id: pool_id.into(),
            version,
            pool_version,
            weights,
            total_weight: DEFAULT_TOTAL_WEIGHT,
            pity: Vec::new(),
        }
    }

    /// Adds a pity rule.
    #[must_use]
    pub fn with_pity(mut self, tier: Tier, threshold: u32) -> Self {
        self.pity.push(PityRule::new(tier, threshold));
        self
    }

    /// Overrides the declared total.
    #[must_use]
    pub fn with_total(mut self, total_weight: u32) -> Self {
        self.total_weight = total_weight;
        self
    }

    /// Sum of all declared weights (computed in `u64`, cannot overflow).
    #[must_use]
    pub fn weight_sum(&self) -> u64 {
        self.weights.iter().map(|w| u64::from(w.weight)).sum()
    }

    /// Weight of `tier`, if the table awards it.
    #[must_use]
    pub fn weight_of(&self, tier: Tier) -> Option<u32> {
        self.weights.iter().find(|w| w.tier == tier).map(|w| w.weight)
    }

    /// Tiers in declared order.
    pub fn tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.weights.iter().map(|w| w.tier)
    }

    /// Pity threshold for `tier`, if the tier has a rule.
    #[must_use]
    pub fn pity_threshold(&self, tier: Tier) -> Option<u32> {
        self.pity.iter().find(|r| r.tier == tier).map(|r| r.threshold)
    }

    /// Cumulative intervals in declared order.
    #[must_use]
    pub fn intervals(&self) -> Vec<TierInterval> {
        let mut low = 0u64;
        self.weights
            .iter()
            .map(|w| {
                let high = low + u64::from(w.weight);
                let interval = TierInterval { tier: w.tier, low, high };
                low = high;
                interval
            })
            .collect()
    }

    /// Maps a roll in `[0, total)` to its tier. Returns `None` outside the range.
    #[must_use]
    pub fn tier_for_roll(&self, roll: u64) -> Option<Tier> {
        let mut cumulative = 0u64;
        for entry in &self.weights {
            cumulative += u64::from(entry.weight);
            if roll < cumulative {
                return Some(entry.tier);
            }
        }
        None
    }

    /// Checks the table on its own (pairing with a pool is checked by the catalog).
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] if a weight is zero, a tier repeats, the weights do
    /// not sum to `total_weight`, or a pity rule is malformed.
    pub fn validate(&self) -> OddsResult<()> {
        let label = format!("table {} v{}", self.pool_id, self.version);

        if self.pool_id.trim().is_empty() {
            return Err(OddsError::Config(format!("{label}: empty pool id")));
        }
        if self.weights.is_empty() {
            return Err(OddsError::Config(format!("{label}: no tiers declared")));
        }
        if self.total_weight == 0 {
            return Err(OddsError::Config(format!("{label}: total weight must be positive")));
        }

        let mut seen = HashSet::new();
        for entry in &self.weights {
            if entry.weight == 0 {
                return Err(OddsError::Config(format!(
                    "{label}: tier {} has non-positive weight",
                    entry.tier
                )));
            }
            if !seen.insert(entry.tier) {
                return Err(OddsError::Config(format!("{label}: tier {} declared twice", entry.tier)));
            }
        }

        let sum = self.weight_sum();
        if sum != u64::from(self.total_weight) {
            return Err(OddsError::Config(format!(
                "{label}: weights sum to {sum}, declared total is {}",
                self.total_weight
            )));
        }

        let mut pity_tiers = HashSet::new();
        for rule in &self.pity {
            if rule.threshold == 0 {
                return Err(OddsError::Config(format!(
                    "{label}: pity threshold for {} must be at least 1",
                    rule.tier
                )));
            }
            if !seen.contains(&rule.tier) {
                return Err(OddsError::Config(format!(
                    "{label}: pity rule names {} which the table never awards",
                    rule.tier
                )));
            }
            if !pity_tiers.insert(rule.tier) {
                return Err(OddsError::Config(format!("{label}: two pity rules for {}", rule.tier)));
            }
        }

        Ok(())
    }
}
