//! # Reward Pools
//!
//! The items a banner can award, grouped by tier, plus the rules for duplicates.
//!
//! Items keep their declared order; selection inside a tier walks them with the
//! same half-open cumulative intervals used for tiers, weighted by `bias_weight`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{OddsError, OddsResult};
use crate::table::PoolId;
use crate::tier::Tier;

/// Unique identifier for an obtainable item.
pub type ItemId = u32;

/// What happens when a user already owns items of the resolved tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Owned items stay in the candidate set.
    #[default]
    Allow,
    /// Owned items are removed before weighting; an exhausted tier awards the conversion item.
    ExcludeOwned,
}

/// A single obtainable item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardItem {
    /// The item ID.
    pub item_id: ItemId,
    /// Tier the item belongs to.
    pub tier: Tier,
    /// Relative weight within the tier (defaults to 1).
    #[serde(default)]
    pub bias_weight: Option<u32>,
}

impl RewardItem {
    /// Creates an unbiased item.
    #[inline]
    #[must_use]
    pub const fn new(item_id: ItemId, tier: Tier) -> Self {
        Self { item_id, tier, bias_weight: None }
    }

    /// Creates an item with an explicit sub-weight.
    #[inline]
    #[must_use]
    pub const fn biased(item_id: ItemId, tier: Tier, bias_weight: u32) -> Self {
        Self { item_id, tier, bias_weight: Some(bias_weight) }
    }

    /// Weight used for selection within the tier.
    #[inline]
    #[must_use]
    pub fn effective_weight(&self) -> u32 {
        self.bias_weight.unwrap_or(1)
    }
}

/// A published reward pool version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPool {
    /// Pool identifier.
    pub pool_id: PoolId,
    /// Pool version (strictly increasing per pool).
    pub version: u64,
    /// Obtainable items, in declared order.
    pub items: Vec<RewardItem>,
    /// Duplicate handling.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Item awarded when every item of the resolved tier is owned.
    #[serde(default)]
    pub conversion_item: Option<ItemId>,
}

impl RewardPool {
    /// Creates a pool that allows duplicates.
    #[must_use]
    pub fn new(pool_id: impl Into<PoolId>, version: u64, items: Vec<RewardItem>) -> Self {
        Self {
            pool_id: pool_id.into(),
            version,
            items,
            duplicate_policy: DuplicatePolicy::Allow,
            conversion_item: None,
        }
    }

    /// Enables duplicate prevention with an optional conversion item.
    #[must_use]
    pub fn excluding_owned(mut self, conversion_item: Option<ItemId>) -> Self {
        self.duplicate_policy = DuplicatePolicy::ExcludeOwned;
        self.conversion_item = conversion_item;
        self
    }

    /// Items of `tier`, in declared order.
    pub fn items_in(&self, tier: Tier) -> impl Iterator<Item = &RewardItem> + Clone + '_ {
        self.items.iter().filter(move |item| item.tier == tier)
    }

    /// Returns true if at least one item belongs to `tier`.
    #[must_use]
    pub fn has_tier(&self, tier: Tier) -> bool {
        self.items.iter().any(|item| item.tier == tier)
    }

    /// Returns true if `item_id` is a tiered item of this pool.
    #[must_use]
    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.iter().any(|item| item.item_id == item_id)
    }

    /// Checks the pool on its own.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] on empty pools, duplicate item ids, zero bias
    /// weights, or a conversion item that is also a tiered item.
    pub fn validate(&self) -> OddsResult<()> {
        let label = format!("pool {} v{}", self.pool_id, self.version);

        if self.pool_id.trim().is_empty() {
            return Err(OddsError::Config(format!("{label}: empty pool id")));
        }
        if self.items.is_empty() {
            return Err(OddsError::Config(format!("{label}: no items")));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.item_id) {
                return Err(OddsError::Config(format!("{label}: item {} listed twice", item.item_id)));
            }
            if item.bias_weight == Some(0) {
                return Err(OddsError::Config(format!(
                    "{label}: item {} has non-positive bias weight",
                    item.item_id
                )));
            }
        }

        if let Some(conversion) = self.conversion_item {
            if seen.contains(&conversion) {
                return Err(OddsError::Config(format!(
                    "{label}: conversion item {conversion} is also a tiered item"
                )));
            }
        }

        Ok(())
    }
}
