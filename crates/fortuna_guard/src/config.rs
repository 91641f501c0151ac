//! # Guard Configuration
//!
//! Detection thresholds. Loaded from the `[guard]` table of the service config;
//! every field has a default so partial documents load.

use serde::{Deserialize, Serialize};

/// Thresholds for the anti-gaming monitor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Intervals shorter than this (ms) count as implausibly fast.
    pub min_interval_ms: u64,
    /// Number of recent inter-pull intervals kept per user.
    pub interval_window: usize,
    /// Fraction of fast intervals in a full window that flags a burst.
    pub burst_ratio: f64,
    /// Organic pulls per pool collected before each chi-square test.
    pub chi_square_window: usize,
    /// Minimum spacing (ms) between pulls of a flagged account.
    pub flagged_spacing_ms: u64,
    /// Unflagged profiles with no pull for this long (ms) are dropped. Zero keeps
    /// every profile.
    pub profile_idle_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 250, // below typical client animation + round trip
            interval_window: 32,
            burst_ratio: 0.75,
            chi_square_window: 500,
            flagged_spacing_ms: 2_000,
            profile_idle_ms: 86_400_000,
        }
    }
}
