//! Reward tiers, totally ordered by rarity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rarity tier of a reward.
///
/// The derived ordering is the rarity order: `Common < Uncommon < Rare < Epic < Legendary`.
/// Every "X or better" comparison in the engine uses it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    /// Common rewards.
    Common = 0,
    /// Uncommon rewards.
    Uncommon = 1,
    /// Rare rewards.
    Rare = 2,
    /// Epic rewards.
    Epic = 3,
    /// Legendary rewards.
    Legendary = 4,
}

impl Tier {
    /// Every tier, most common first.
    pub const ALL: [Self; 5] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
    ];

    /// Converts from the persisted `u8` representation.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Common),
            1 => Some(Self::Uncommon),
            2 => Some(Self::Rare),
            3 => Some(Self::Epic),
            4 => Some(Self::Legendary),
            _ => None,
        }
    }

    /// Returns true if `self` is `floor` or rarer.
    #[inline]
    #[must_use]
    pub fn is_at_least(self, floor: Self) -> bool {
        self >= floor
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rarity_order() {
        assert!(Tier::Legendary > Tier::Epic);
        assert!(Tier::Rare.is_at_least(Tier::Rare));
        assert!(Tier::Epic.is_at_least(Tier::Uncommon));
        assert!(!Tier::Common.is_at_least(Tier::Uncommon));
    }

    #[test]
    fn test_u8_roundtrip_rejects_unknown() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_u8(tier as u8), Some(tier));
        }
        assert_eq!(Tier::from_u8(5), None);
    }
}
