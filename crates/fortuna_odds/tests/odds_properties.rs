//! # Odds Contract Verification
//!
//! Properties the published-odds contract must hold for every table:
//!
//! 1. **Coverage**: every roll in `[0, total)` lands in exactly one tier
//! 2. **Pity exactness**: the threshold pull always reaches the guaranteed tier
//! 3. **Convergence**: 1,000,000 draws match the declared weights
//!
//! Run with: cargo test -p fortuna_odds --test odds_properties -- --nocapture

use std::collections::HashSet;

use fortuna_odds::{
    resolve, simulate, PityState, ProbabilityTable, RewardItem, RewardPool, SeededDraws, Tier, TierWeight,
};

fn spec_table() -> ProbabilityTable {
    ProbabilityTable::new(
        "standard",
        1,
        1,
        vec![
            TierWeight::new(Tier::Common, 700_000),
            TierWeight::new(Tier::Rare, 290_000),
            TierWeight::new(Tier::Legendary, 10_000),
        ],
    )
}

fn spec_pool() -> RewardPool {
    RewardPool::new(
        "standard",
        1,
        vec![
            RewardItem::new(1, Tier::Common),
            RewardItem::new(2, Tier::Common),
            RewardItem::new(20, Tier::Rare),
            RewardItem::new(300, Tier::Legendary),
        ],
    )
}

#[test]
fn verify_intervals_cover_range_without_gaps() {
    let tables = [
        spec_table(),
        ProbabilityTable::new(
            "odd",
            1,
            1,
            vec![
                TierWeight::new(Tier::Legendary, 1),
                TierWeight::new(Tier::Common, 3),
                TierWeight::new(Tier::Epic, 2),
                TierWeight::new(Tier::Uncommon, 4),
            ],
        )
        .with_total(10),
    ];

    for table in &tables {
        table.validate().unwrap();
        let intervals = table.intervals();

        assert_eq!(intervals.first().unwrap().low, 0);
        assert_eq!(intervals.last().unwrap().high, u64::from(table.total_weight));
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].high, pair[1].low, "gap or overlap between {:?}", pair);
        }

        // Exhaustive for the small table, strided for the large one.
        let total = u64::from(table.total_weight);
        let step = (total / 100_000).max(1);
        let mut roll = 0;
        while roll < total {
            let owners = intervals.iter().filter(|i| i.contains(roll)).count();
            assert_eq!(owners, 1, "roll {roll} owned by {owners} tiers");
            assert!(table.tier_for_roll(roll).is_some());
            roll += step;
        }
        for boundary in intervals.iter().flat_map(|i| [i.low, i.high - 1]) {
            assert_eq!(intervals.iter().filter(|i| i.contains(boundary)).count(), 1);
        }
    }
}

#[test]
fn verify_pity_exactness() {
    let threshold = 10;
    let table = spec_table().with_pity(Tier::Rare, threshold);
    let pool = spec_pool();
    let owned = HashSet::new();

    // Every draw that would be Common on its own.
    let common_draws = [0u64, 1, 123_456, 699_999, 5_000_000];

    for &final_draw in &common_draws {
        let mut state = PityState::default();
        for _ in 0..threshold - 1 {
            let outcome = resolve(&table, &pool, &state, &owned, 0).unwrap();
            assert_eq!(outcome.tier, Tier::Common);
            assert!(!outcome.pity_triggered);
            state = state.advance(&table, outcome.tier);
        }
        assert_eq!(state.count(Tier::Rare), threshold - 1);

        let outcome = resolve(&table, &pool, &state, &owned, final_draw).unwrap();
        assert!(outcome.tier.is_at_least(Tier::Rare), "threshold pull gave {}", outcome.tier);
        assert!(outcome.pity_triggered);

        let state = state.advance(&table, outcome.tier);
        assert_eq!(state.count(Tier::Rare), 0);
        state.check_integrity(&table).unwrap();
    }
}

#[test]
fn verify_rare_pity_scenario() {
    let table = spec_table().with_pity(Tier::Rare, 10);
    let state = PityState::default().with_count(Tier::Rare, 9);

    // 42 alone is a Common roll.
    assert_eq!(table.tier_for_roll(42), Some(Tier::Common));
    let outcome = resolve(&table, &spec_pool(), &state, &HashSet::new(), 42).unwrap();

    assert!(outcome.tier.is_at_least(Tier::Rare));
    assert!(outcome.pity_triggered);
    assert_eq!(state.advance(&table, outcome.tier).count(Tier::Rare), 0);
}

#[test]
fn verify_statistical_convergence() {
    let table = spec_table();
    let report = simulate(&table, &spec_pool(), &SeededDraws::new(0xF0_27_0A), 1_000_000, false).unwrap();

    println!("\n=== Statistical Convergence (1,000,000 pulls) ===");
    for tier in [Tier::Common, Tier::Rare, Tier::Legendary] {
        let observed = report.observed(tier);
        let expected = report.expected(tier);
        let se = report.standard_error(tier);
        println!("{tier:<10} observed {observed:.6} expected {expected:.6} (se {se:.6})");

        // Five standard errors: a false failure is roughly one in 1.7 million.
        assert!(
            (observed - expected).abs() <= 5.0 * se,
            "{tier}: observed {observed} deviates from {expected} by more than 5 se ({se})"
        );
    }
    assert_eq!(report.total_pulls, 1_000_000);
    assert_eq!(report.pity_triggers, 0);
}
