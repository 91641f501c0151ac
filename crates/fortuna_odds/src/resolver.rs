//! # Outcome Resolver
//!
//! **Pure function: one draw in, one outcome out.**
//!
//! ```text
//! draw ──┬─> pity due? ──yes──> draw mod span(tiers >= floor) ──┐
//!        │                                                     ├─> tier
//!        └──────────────no────> draw mod total_weight ─────────┘
//!                                                              │
//!        draw / span ──> bias-weighted item among candidates <─┘
//!                         (owned items removed if ExcludeOwned)
//! ```
//!
//! Nothing here reads clocks, locks, or global state. Replaying the same
//! `(table, pool, pity, owned, draw)` always yields the same outcome, which is
//! what makes every committed pull auditable.

use std::collections::HashSet;

use crate::error::{OddsError, OddsResult};
use crate::pity::PityState;
use crate::pool::{DuplicatePolicy, ItemId, RewardPool};
use crate::table::ProbabilityTable;
use crate::tier::Tier;

/// A resolved pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Tier reached.
    pub tier: Tier,
    /// Item awarded.
    pub item_id: ItemId,
    /// Whether the pity guarantee forced this pull.
    pub pity_triggered: bool,
    /// Whether the conversion item replaced an exhausted tier.
    pub converted: bool,
}

/// Resolves one pull.
///
/// # Errors
///
/// - [`OddsError::WeightMismatch`] if the table's weights no longer sum to its total
/// - [`OddsError::Config`] if the pool has no items for the resolved tier
/// - [`OddsError::ExhaustedPool`] if every candidate is owned and no conversion item exists
pub fn resolve(
    table: &ProbabilityTable,
    pool: &RewardPool,
    pity: &PityState,
    owned: &HashSet<ItemId>,
    draw: u64,
) -> OddsResult<Outcome> {
    let total = table.weight_sum();
    if total == 0 || total != u64::from(table.total_weight) {
        return Err(OddsError::WeightMismatch {
            pool_id: table.pool_id.clone(),
            version: table.version,
            declared: u64::from(table.total_weight),
            actual: total,
        });
    }

    let forced = pity.forced_tier(table);
    let (tier, span) = match forced {
        Some(floor) => {
            let eligible = table
                .weights
                .iter()
                .filter(|w| w.tier.is_at_least(floor))
                .map(|w| (w.tier, u64::from(w.weight)));
            let span: u64 = eligible.clone().map(|(_, weight)| weight).sum();
            (pick_weighted(eligible, draw % span.max(1)), span)
        }
        None => {
            let entries = table.weights.iter().map(|w| (w.tier, u64::from(w.weight)));
            (pick_weighted(entries, draw % total), total)
        }
    };

    let tier = tier.ok_or_else(|| {
        OddsError::Config(format!(
            "table {} v{} has no tier at or above the pity floor",
            table.pool_id, table.version
        ))
    })?;

    let (item_id, converted) = select_item(pool, tier, owned, draw / span.max(1))?;

    Ok(Outcome {
        tier,
        item_id,
        pity_triggered: forced.is_some(),
        converted,
    })
}

/// Selects an item inside `tier`, honoring the pool's duplicate policy.
fn select_item(
    pool: &RewardPool,
    tier: Tier,
    owned: &HashSet<ItemId>,
    roll: u64,
) -> OddsResult<(ItemId, bool)> {
    if !pool.has_tier(tier) {
        return Err(OddsError::Config(format!(
            "pool {} v{} has no {tier} items",
            pool.pool_id, pool.version
        )));
    }

    let exclude_owned = pool.duplicate_policy == DuplicatePolicy::ExcludeOwned;
    let candidates = pool
        .items_in(tier)
        .filter(|item| !(exclude_owned && owned.contains(&item.item_id)))
        .map(|item| (item.item_id, u64::from(item.effective_weight())));

    let span: u64 = candidates.clone().map(|(_, weight)| weight).sum();
    if span == 0 {
        return match pool.conversion_item {
            Some(conversion) => Ok((conversion, true)),
            None => Err(OddsError::ExhaustedPool {
                pool_id: pool.pool_id.clone(),
                tier,
            }),
        };
    }

    pick_weighted(candidates, roll % span)
        .map(|item_id| (item_id, false))
        .ok_or_else(|| OddsError::Config(format!("pool {} weights overflowed", pool.pool_id)))
}

/// Walks half-open cumulative intervals `[low, high)` and returns the owner of `roll`.
fn pick_weighted<T>(entries: impl Iterator<Item = (T, u64)>, roll: u64) -> Option<T> {
    let mut cumulative = 0u64;
    for (value, weight) in entries {
        cumulative = cumulative.saturating_add(weight);
        if roll < cumulative {
            return Some(value);
        }
    }
    None
}
