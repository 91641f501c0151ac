//! # Odds Simulation
//!
//! Runs the resolver against a draw source and tallies tiers, for publishing
//! audits and statistical verification of a table before it goes live.

use std::collections::{BTreeMap, HashSet};

use crate::entropy::DrawSource;
use crate::error::OddsResult;
use crate::pity::PityState;
use crate::pool::RewardPool;
use crate::resolver::resolve;
use crate::table::ProbabilityTable;
use crate::tier::Tier;

/// Statistics from a simulated pull sequence.
#[derive(Clone, Debug, Default)]
pub struct SimulationReport {
    /// Total pulls simulated.
    pub total_pulls: u64,
    /// Pulls per resolved tier.
    pub tier_counts: BTreeMap<Tier, u64>,
    /// Pulls forced by pity.
    pub pity_triggers: u64,
    /// Declared weights, for comparison.
    pub declared: BTreeMap<Tier, u32>,
    /// Declared total.
    pub total_weight: u32,
}

impl SimulationReport {
    /// Observed frequency of `tier`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn observed(&self, tier: Tier) -> f64 {
        if self.total_pulls == 0 {
            return 0.0;
        }
        self.tier_counts.get(&tier).copied().unwrap_or(0) as f64 / self.total_pulls as f64
    }

    /// Declared probability of `tier`.
    #[must_use]
    pub fn expected(&self, tier: Tier) -> f64 {
        if self.total_weight == 0 {
            return 0.0;
        }
        f64::from(self.declared.get(&tier).copied().unwrap_or(0)) / f64::from(self.total_weight)
    }

    /// Standard error of the observed frequency of `tier` under the declared odds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn standard_error(&self, tier: Tier) -> f64 {
        if self.total_pulls == 0 {
            return 0.0;
        }
        let p = self.expected(tier);
        (p * (1.0 - p) / self.total_pulls as f64).sqrt()
    }
}

/// Simulates `pulls` consecutive pulls by one user.
///
/// With `track_pity` the pity state advances like a live ledger; without it every
/// pull resolves from a fresh state, measuring the raw table.
///
/// # Errors
///
/// Propagates draw and resolution errors.
pub fn simulate(
    table: &ProbabilityTable,
    pool: &RewardPool,
    draws: &dyn DrawSource,
    pulls: u64,
    track_pity: bool,
) -> OddsResult<SimulationReport> {
    let mut report = SimulationReport {
        declared: table.weights.iter().map(|w| (w.tier, w.weight)).collect(),
        total_weight: table.total_weight,
        ..SimulationReport::default()
    };
    let fresh = PityState::default();
    let mut state = PityState::default();
    let owned = HashSet::new();

    for _ in 0..pulls {
        let pity = if track_pity { &state } else { &fresh };
        let outcome = resolve(table, pool, pity, &owned, draws.next_draw()?)?;

        report.total_pulls += 1;
        *report.tier_counts.entry(outcome.tier).or_insert(0) += 1;
        if outcome.pity_triggered {
            report.pity_triggers += 1;
        }
        if track_pity {
            state = state.advance(table, outcome.tier);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededDraws;
    use crate::pool::RewardItem;
    use crate::table::TierWeight;

    #[test]
    fn test_pity_tracking_changes_the_mix() {
        let table = ProbabilityTable::new(
            "p",
            1,
            1,
            vec![TierWeight::new(Tier::Common, 990_000), TierWeight::new(Tier::Rare, 10_000)],
        )
        .with_pity(Tier::Rare, 10);
        let pool = RewardPool::new("p", 1, vec![RewardItem::new(1, Tier::Common), RewardItem::new(2, Tier::Rare)]);

        let raw = simulate(&table, &pool, &SeededDraws::new(1), 10_000, false).unwrap();
        let tracked = simulate(&table, &pool, &SeededDraws::new(1), 10_000, true).unwrap();

        assert_eq!(raw.pity_triggers, 0);
        assert!(tracked.pity_triggers > 0);
        // With threshold 10, at least one Rare in every 10 pulls.
        assert!(tracked.tier_counts[&Tier::Rare] >= 1_000);
        assert!(raw.observed(Tier::Rare) < tracked.observed(Tier::Rare));
    }
}
