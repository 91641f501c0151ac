//! # Pity Counters
//!
//! Per `(user, pool)` counter vector. There are no discrete modes: the state is
//! just "pulls since the last `tier`-or-better" for every pity tier of the table.
//!
//! ## Exactness
//!
//! With threshold `k`, a counter reads at most `k - 1`. The pull that would make
//! it `k` is forced, so the guarantee fires on the threshold pull and never later.
//! A counter at or past its threshold under the same table version means a write
//! was lost; that is reported as corruption and never repaired silently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{OddsError, OddsResult};
use crate::table::ProbabilityTable;
use crate::tier::Tier;

/// Pity state of one `(user, pool)` pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PityState {
    /// Consecutive pulls without reaching each pity tier.
    pub pulls_since: BTreeMap<Tier, u32>,
    /// Committed pulls on this pool, ever.
    pub lifetime_pulls: u64,
    /// Table version of the last committed pull.
    pub table_version: Option<u64>,
}

impl PityState {
    /// Counter for `tier` (zero if never tracked).
    #[must_use]
    pub fn count(&self, tier: Tier) -> u32 {
        self.pulls_since.get(&tier).copied().unwrap_or(0)
    }

    /// Sets a counter directly. Used for migrations and tests.
    #[must_use]
    pub fn with_count(mut self, tier: Tier, count: u32) -> Self {
        self.pulls_since.insert(tier, count);
        self
    }

    /// The tier the next pull is forced to reach, if any.
    ///
    /// When several rules are due at once the rarest tier wins.
    #[must_use]
    pub fn forced_tier(&self, table: &ProbabilityTable) -> Option<Tier> {
        table
            .pity
            .iter()
            .filter(|rule| self.count(rule.tier).saturating_add(1) >= rule.threshold)
            .map(|rule| rule.tier)
            .max()
    }

    /// Verifies the read-time invariant against the table that will resolve the pull.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::LedgerCorruption`] if a counter sits at or past its
    /// threshold although the last pull used this same table version.
    pub fn check_integrity(&self, table: &ProbabilityTable) -> OddsResult<()> {
        if self.table_version != Some(table.version) {
            return Ok(());
        }
        for rule in &table.pity {
            let count = self.count(rule.tier);
            if count >= rule.threshold {
                return Err(OddsError::LedgerCorruption {
                    tier: rule.tier,
                    count,
                    threshold: rule.threshold,
                });
            }
        }
        Ok(())
    }

    /// State after committing a pull that resolved to `outcome` under `table`.
    ///
    /// Counters for tiers the table no longer guarantees are dropped.
    #[must_use]
    pub fn advance(&self, table: &ProbabilityTable, outcome: Tier) -> Self {
        let pulls_since = table
            .pity
            .iter()
            .map(|rule| {
                let next = if outcome.is_at_least(rule.tier) {
                    0
                } else {
                    self.count(rule.tier).saturating_add(1)
                };
                (rule.tier, next)
            })
            .collect();

        Self {
            pulls_since,
            lifetime_pulls: self.lifetime_pulls + 1,
            table_version: Some(table.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TierWeight;

    fn table() -> ProbabilityTable {
        ProbabilityTable::new(
            "starter",
            1,
            1,
            vec![
                TierWeight::new(Tier::Common, 900_000),
                TierWeight::new(Tier::Rare, 95_000),
                TierWeight::new(Tier::Legendary, 5_000),
            ],
        )
        .with_pity(Tier::Rare, 10)
        .with_pity(Tier::Legendary, 90)
    }

    #[test]
    fn test_forced_exactly_on_threshold_pull() {
        let table = table();
        let state = PityState::default().with_count(Tier::Rare, 8);
        assert_eq!(state.forced_tier(&table), None);
        let state = state.with_count(Tier::Rare, 9);
        assert_eq!(state.forced_tier(&table), Some(Tier::Rare));
    }

    #[test]
    fn test_rarest_rule_wins() {
        let state = PityState::default()
            .with_count(Tier::Rare, 9)
            .with_count(Tier::Legendary, 89);
        assert_eq!(state.forced_tier(&table()), Some(Tier::Legendary));
    }

    #[test]
    fn test_advance_resets_at_or_below_outcome() {
        let table = table();
        let state = PityState::default()
            .with_count(Tier::Rare, 4)
            .with_count(Tier::Legendary, 40);

        let after_common = state.advance(&table, Tier::Common);
        assert_eq!(after_common.count(Tier::Rare), 5);
        assert_eq!(after_common.count(Tier::Legendary), 41);
        assert_eq!(after_common.lifetime_pulls, 1);
        assert_eq!(after_common.table_version, Some(1));

        let after_rare = after_common.advance(&table, Tier::Rare);
        assert_eq!(after_rare.count(Tier::Rare), 0);
        assert_eq!(after_rare.count(Tier::Legendary), 42);

        let after_legendary = after_rare.advance(&table, Tier::Legendary);
        assert_eq!(after_legendary.count(Tier::Rare), 0);
        assert_eq!(after_legendary.count(Tier::Legendary), 0);
    }

    #[test]
    fn test_corruption_only_under_same_version() {
        let table = table();
        let mut state = PityState::default().with_count(Tier::Rare, 10);
        assert!(state.check_integrity(&table).is_ok());

        state.table_version = Some(1);
        assert_eq!(
            state.check_integrity(&table),
            Err(OddsError::LedgerCorruption { tier: Tier::Rare, count: 10, threshold: 10 })
        );

        // Lowered thresholds in a newer version just force the next pull.
        state.table_version = Some(0);
        assert!(state.check_integrity(&table).is_ok());
        assert_eq!(state.forced_tier(&table), Some(Tier::Rare));
    }
}
