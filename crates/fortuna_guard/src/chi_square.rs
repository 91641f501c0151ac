//! # Chi-Square Goodness of Fit
//!
//! Tests observed tier counts against a table's declared weights.
//!
//! Cells whose expected count is below 5 are pooled into one cell (and that cell
//! into the smallest remaining one if it is still too thin), the usual validity
//! condition for the chi-square approximation.

use std::collections::BTreeMap;

use fortuna_odds::{ProbabilityTable, Tier};

use crate::error::{GuardError, GuardResult};

/// Minimum expected count for a cell to stand on its own.
const MIN_EXPECTED: f64 = 5.0;

/// Upper-tail critical values at p = 0.001, indexed by degrees of freedom - 1.
const CRITICAL_P001: [f64; 4] = [10.828, 13.816, 16.266, 18.467];

/// Critical value at p = 0.001 for `degrees_of_freedom` (1 through 4).
#[must_use]
pub fn critical_value(degrees_of_freedom: usize) -> Option<f64> {
    degrees_of_freedom
        .checked_sub(1)
        .and_then(|index| CRITICAL_P001.get(index))
        .copied()
}

/// Outcome of one goodness-of-fit test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChiSquareTest {
    /// Pearson statistic.
    pub statistic: f64,
    /// Degrees of freedom after pooling.
    pub degrees_of_freedom: usize,
    /// Critical value the statistic is compared against.
    pub critical: f64,
    /// Observations tested.
    pub samples: u64,
}

impl ChiSquareTest {
    /// True when the observed frequencies are implausible under the declared odds.
    #[must_use]
    pub fn rejects(&self) -> bool {
        self.statistic > self.critical
    }

    /// Runs the test. Returns `Ok(None)` when there is too little data or too few
    /// cells left after pooling.
    ///
    /// # Errors
    ///
    /// - [`GuardError::InvalidTable`] if the table carries no weight
    /// - [`GuardError::UnknownTier`] if a counted tier is absent from the table
    #[allow(clippy::cast_precision_loss)]
    pub fn run(table: &ProbabilityTable, counts: &BTreeMap<Tier, u64>) -> GuardResult<Option<Self>> {
        let total_weight = table.weight_sum();
        if total_weight == 0 {
            return Err(GuardError::InvalidTable {
                pool_id: table.pool_id.clone(),
                version: table.version,
                reason: "weights sum to zero".to_string(),
            });
        }
        if let Some(&tier) = counts.keys().find(|&&tier| table.weight_of(tier).is_none()) {
            return Err(GuardError::UnknownTier {
                pool_id: table.pool_id.clone(),
                version: table.version,
                tier,
            });
        }

        let samples: u64 = counts.values().sum();
        if samples == 0 {
            return Ok(None);
        }

        // (expected, observed) per cell
        let mut cells: Vec<(f64, f64)> = Vec::with_capacity(table.weights.len());
        let mut pooled = (0.0, 0.0);
        let mut any_pooled = false;
        for weight in &table.weights {
            let expected = samples as f64 * f64::from(weight.weight) / total_weight as f64;
            let observed = counts.get(&weight.tier).copied().unwrap_or(0) as f64;
            if expected < MIN_EXPECTED {
                pooled.0 += expected;
                pooled.1 += observed;
                any_pooled = true;
            } else {
                cells.push((expected, observed));
            }
        }

        if any_pooled {
            let smallest = cells
                .iter_mut()
                .min_by(|a, b| a.0.total_cmp(&b.0));
            match smallest {
                Some(cell) if pooled.0 < MIN_EXPECTED => {
                    cell.0 += pooled.0;
                    cell.1 += pooled.1;
                }
                _ => cells.push(pooled),
            }
        }

        let Some(degrees_of_freedom) = cells.len().checked_sub(1).filter(|&df| df > 0) else {
            return Ok(None);
        };
        let Some(critical) = critical_value(degrees_of_freedom) else {
            return Ok(None);
        };

        let statistic = cells
            .iter()
            .map(|&(expected, observed)| (observed - expected).powi(2) / expected)
            .sum();

        Ok(Some(Self {
            statistic,
            degrees_of_freedom,
            critical,
            samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortuna_odds::TierWeight;

    fn table() -> ProbabilityTable {
        ProbabilityTable::new(
            "starter",
            1,
            1,
            vec![
                TierWeight::new(Tier::Common, 700_000),
                TierWeight::new(Tier::Rare, 290_000),
                TierWeight::new(Tier::Legendary, 10_000),
            ],
        )
    }

    fn counts(common: u64, rare: u64, legendary: u64) -> BTreeMap<Tier, u64> {
        [(Tier::Common, common), (Tier::Rare, rare), (Tier::Legendary, legendary)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_critical_values() {
        assert_eq!(critical_value(0), None);
        assert_eq!(critical_value(1), Some(10.828));
        assert_eq!(critical_value(4), Some(18.467));
        assert_eq!(critical_value(5), None);
    }

    #[test]
    fn test_exact_frequencies_accept() {
        let test = ChiSquareTest::run(&table(), &counts(700, 290, 10)).unwrap().unwrap();
        assert_eq!(test.degrees_of_freedom, 2);
        assert!(test.statistic.abs() < 1e-9);
        assert!(!test.rejects());
    }

    #[test]
    fn test_low_expectation_tier_is_pooled() {
        // 100 samples: Legendary expects 1.0, too thin, merged into Rare (29.0).
        let test = ChiSquareTest::run(&table(), &counts(70, 29, 1)).unwrap().unwrap();
        assert_eq!(test.degrees_of_freedom, 1);
        assert!(!test.rejects());
    }

    #[test]
    fn test_skewed_frequencies_reject() {
        let test = ChiSquareTest::run(&table(), &counts(400, 300, 300)).unwrap().unwrap();
        assert!(test.rejects());
    }

    #[test]
    fn test_unknown_tier_is_an_error() {
        let mut observed = counts(1, 1, 1);
        observed.insert(Tier::Epic, 1);
        assert!(matches!(
            ChiSquareTest::run(&table(), &observed),
            Err(GuardError::UnknownTier { tier: Tier::Epic, .. })
        ));
    }

    #[test]
    fn test_no_samples_no_test() {
        assert_eq!(ChiSquareTest::run(&table(), &BTreeMap::new()).unwrap(), None);
    }
}
