//! Per-user observation state.

use std::collections::{BTreeMap, HashMap, VecDeque};

use fortuna_odds::{PoolId, Tier};

/// Why an account was flagged.
#[derive(Clone, Debug, PartialEq)]
pub enum FlagReason {
    /// Too many implausibly short inter-pull intervals.
    RapidPulls {
        /// Fast intervals in the window.
        fast: usize,
        /// Window size.
        window: usize,
    },
    /// Organic tier frequencies deviate from the published odds.
    OddsDeviation {
        /// Pool whose stream deviated.
        pool_id: PoolId,
        /// Table version in force.
        table_version: u64,
        /// Chi-square statistic.
        statistic: f64,
        /// Critical value exceeded.
        critical: f64,
    },
}

impl FlagReason {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RapidPulls { .. } => "rapid_pulls",
            Self::OddsDeviation { .. } => "odds_deviation",
        }
    }
}

/// Organic (non-pity) tiers seen on one pool under one table version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TierWindow {
    /// Table version the window belongs to.
    pub table_version: u64,
    /// Counts since the last test.
    pub counts: BTreeMap<Tier, u64>,
    /// Observations since the last test.
    pub len: usize,
}

impl TierWindow {
    /// Empty window for `table_version`.
    #[must_use]
    pub fn new(table_version: u64) -> Self {
        Self {
            table_version,
            ..Self::default()
        }
    }

    /// Records one organic tier.
    pub fn record(&mut self, tier: Tier) {
        *self.counts.entry(tier).or_insert(0) += 1;
        self.len += 1;
    }
}

/// Everything the monitor knows about one user. Never read by the resolver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AntiGamingProfile {
    /// Most recent inter-pull intervals (ms), oldest first.
    pub intervals: VecDeque<u64>,
    /// Timestamp (ms) of the latest observed pull.
    pub last_pull_ms: Option<u64>,
    /// Organic tier windows per pool.
    pub tier_windows: HashMap<PoolId, TierWindow>,
    /// Whether the account is flagged for review.
    pub flagged: bool,
    /// Distinct reasons the account was flagged, first occurrence each.
    pub reasons: Vec<FlagReason>,
    /// Pulls observed.
    pub observed_pulls: u64,
}

impl AntiGamingProfile {
    /// Records the spacing to the previous pull. Out-of-order timestamps count as
    /// zero-length intervals and never move `last_pull_ms` backwards.
    pub(crate) fn record_interval(&mut self, timestamp_ms: u64, window: usize) {
        if let Some(last) = self.last_pull_ms {
            self.intervals.push_back(timestamp_ms.saturating_sub(last));
            while self.intervals.len() > window {
                self.intervals.pop_front();
            }
        }
        self.last_pull_ms = Some(self.last_pull_ms.map_or(timestamp_ms, |last| last.max(timestamp_ms)));
    }

    /// Intervals in the window shorter than `floor_ms`.
    #[must_use]
    pub fn fast_intervals(&self, floor_ms: u64) -> usize {
        self.intervals.iter().filter(|&&interval| interval < floor_ms).count()
    }

    /// Flags the account. Returns true if `reason` is a new kind of reason.
    pub(crate) fn flag(&mut self, reason: FlagReason) -> bool {
        self.flagged = true;
        if self.reasons.iter().any(|existing| existing.label() == reason.label()) {
            return false;
        }
        self.reasons.push(reason);
        true
    }
}
