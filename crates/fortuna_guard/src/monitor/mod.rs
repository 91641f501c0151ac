//! # Anti-Gaming Monitor
//!
//! Post-commit analysis of each user's pull stream.
//!
//! ## Detection Methods
//!
//! - **Rapid pulls**: a full interval window where at least `burst_ratio` of the
//!   intervals fall below `min_interval_ms`
//! - **Odds deviation**: every `chi_square_window` organic pulls on a pool, a
//!   chi-square test of the tier counts against the table in force
//!
//! Pity-forced pulls are excluded from the tier window: they are drawn from a
//! truncated distribution and would bias the test. A new table version starts a
//! new window.
//!
//! ## Retention
//!
//! Profiles of unflagged users idle for `profile_idle_ms` are evicted. The sweep
//! runs inside `observe` at most once per idle period. Flagged profiles stay until
//! cleared, since they drive admission.

mod profile;

pub use profile::{AntiGamingProfile, FlagReason, TierWindow};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use fortuna_odds::{ProbabilityTable, Tier};

use crate::chi_square::ChiSquareTest;
use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};

/// Opaque, already-authenticated user identifier.
pub type UserId = String;

/// Result of observing one pull.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Verdict {
    /// Whether the account is flagged after this observation.
    pub flagged: bool,
    /// Reasons raised for the first time by this observation.
    pub new_reasons: Vec<FlagReason>,
}

/// Admission advice for the next pull of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Pull may proceed.
    Allow,
    /// Flagged account pulling faster than the configured spacing.
    Throttle {
        /// Milliseconds until a pull would be admitted.
        retry_after_ms: u64,
    },
}

/// A flag raised against an account, queued for operators.
#[derive(Clone, Debug, PartialEq)]
pub struct FlagReport {
    /// Flagged user.
    pub user_id: UserId,
    /// Why.
    pub reason: FlagReason,
    /// Timestamp (ms) of the pull that raised it.
    pub timestamp_ms: u64,
}

/// Advisory anti-gaming monitor.
///
/// Profile updates are last-write-wins; nothing here is durable.
pub struct AntiGamingMonitor {
    /// Configuration.
    config: GuardConfig,
    /// Per-user state.
    profiles: RwLock<HashMap<UserId, AntiGamingProfile>>,
    /// Flags not yet collected.
    reports: Mutex<Vec<FlagReport>>,
    /// Observation timestamp (ms) of the last idle sweep.
    last_sweep_ms: AtomicU64,
}

impl AntiGamingMonitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            profiles: RwLock::new(HashMap::new()),
            reports: Mutex::new(Vec::new()),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Observes a committed pull.
    ///
    /// # Errors
    ///
    /// - [`GuardError::UnknownTier`] if `tier` is not weighted by `table`
    /// - [`GuardError::InvalidTable`] if the table cannot be tested against
    #[allow(clippy::cast_precision_loss)]
    pub fn observe(
        &self,
        user_id: &str,
        table: &ProbabilityTable,
        tier: Tier,
        pity_triggered: bool,
        timestamp_ms: u64,
    ) -> GuardResult<Verdict> {
        if table.weight_of(tier).is_none() {
            return Err(GuardError::UnknownTier {
                pool_id: table.pool_id.clone(),
                version: table.version,
                tier,
            });
        }

        let mut new_reasons = Vec::new();
        let flagged = {
            let mut profiles = self.profiles.write();
            let idle_ms = self.config.profile_idle_ms;
            let last_sweep = self.last_sweep_ms.load(Ordering::Relaxed);
            if idle_ms > 0 && timestamp_ms.saturating_sub(last_sweep) >= idle_ms {
                self.last_sweep_ms.store(timestamp_ms, Ordering::Relaxed);
                let evicted = Self::evict(&mut profiles, timestamp_ms, idle_ms);
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = profiles.len(), "idle profiles evicted");
                }
            }
            let profile = profiles.entry(user_id.to_string()).or_default();
            profile.observed_pulls += 1;

            // Check for bursts
            profile.record_interval(timestamp_ms, self.config.interval_window);
            let window = profile.intervals.len();
            if window > 0 && window >= self.config.interval_window {
                let fast = profile.fast_intervals(self.config.min_interval_ms);
                if fast as f64 / window as f64 >= self.config.burst_ratio {
                    let reason = FlagReason::RapidPulls { fast, window };
                    if profile.flag(reason.clone()) {
                        new_reasons.push(reason);
                    }
                }
            }

            // Check organic odds
            if !pity_triggered {
                let tiers = profile
                    .tier_windows
                    .entry(table.pool_id.clone())
                    .or_insert_with(|| TierWindow::new(table.version));
                if tiers.table_version != table.version {
                    *tiers = TierWindow::new(table.version);
                }
                tiers.record(tier);

                if tiers.len >= self.config.chi_square_window {
                    let counts = std::mem::take(&mut tiers.counts);
                    tiers.len = 0;
                    if let Some(test) = ChiSquareTest::run(table, &counts)? {
                        if test.rejects() {
                            let reason = FlagReason::OddsDeviation {
                                pool_id: table.pool_id.clone(),
                                table_version: table.version,
                                statistic: test.statistic,
                                critical: test.critical,
                            };
                            if profile.flag(reason.clone()) {
                                new_reasons.push(reason);
                            }
                        }
                    }
                }
            }

            profile.flagged
        };

        if !new_reasons.is_empty() {
            let mut reports = self.reports.lock();
            for reason in &new_reasons {
                tracing::info!(user_id, pool_id = %table.pool_id, reason = reason.label(), "account flagged for review");
                reports.push(FlagReport {
                    user_id: user_id.to_string(),
                    reason: reason.clone(),
                    timestamp_ms,
                });
            }
        }

        Ok(Verdict { flagged, new_reasons })
    }

    /// Admission advice for a pull by `user_id` at `now_ms`.
    #[must_use]
    pub fn admission(&self, user_id: &str, now_ms: u64) -> Admission {
        let profiles = self.profiles.read();
        let Some(profile) = profiles.get(user_id).filter(|profile| profile.flagged) else {
            return Admission::Allow;
        };
        let Some(last) = profile.last_pull_ms else {
            return Admission::Allow;
        };

        let elapsed = now_ms.saturating_sub(last);
        if elapsed < self.config.flagged_spacing_ms {
            Admission::Throttle {
                retry_after_ms: self.config.flagged_spacing_ms - elapsed,
            }
        } else {
            Admission::Allow
        }
    }

    /// Whether `user_id` is flagged.
    #[must_use]
    pub fn is_flagged(&self, user_id: &str) -> bool {
        self.profiles.read().get(user_id).is_some_and(|profile| profile.flagged)
    }

    /// Snapshot of a user's profile.
    #[must_use]
    pub fn profile(&self, user_id: &str) -> Option<AntiGamingProfile> {
        self.profiles.read().get(user_id).cloned()
    }

    /// Flagged users, sorted.
    #[must_use]
    pub fn flagged_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .profiles
            .read()
            .iter()
            .filter(|(_, profile)| profile.flagged)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Clears a user's flag after review. Returns true if the user was flagged.
    pub fn clear(&self, user_id: &str) -> bool {
        let mut profiles = self.profiles.write();
        let Some(profile) = profiles.get_mut(user_id) else {
            return false;
        };
        let was_flagged = profile.flagged;
        profile.flagged = false;
        profile.reasons.clear();
        profile.intervals.clear();
        was_flagged
    }

    /// Drops unflagged profiles with no pull in the `profile_idle_ms` before
    /// `now_ms`. Returns how many were dropped.
    pub fn evict_idle(&self, now_ms: u64) -> usize {
        if self.config.profile_idle_ms == 0 {
            return 0;
        }
        Self::evict(&mut self.profiles.write(), now_ms, self.config.profile_idle_ms)
    }

    /// Number of users with a profile.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.profiles.read().len()
    }

    fn evict(profiles: &mut HashMap<UserId, AntiGamingProfile>, now_ms: u64, idle_ms: u64) -> usize {
        let before = profiles.len();
        profiles.retain(|_, profile| {
            profile.flagged
                || profile
                    .last_pull_ms
                    .is_some_and(|last| now_ms.saturating_sub(last) < idle_ms)
        });
        before - profiles.len()
    }

    /// Takes ownership of pending flag reports.
    pub fn take_reports(&self) -> Vec<FlagReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl Default for AntiGamingMonitor {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortuna_odds::TierWeight;

    fn table(version: u64) -> ProbabilityTable {
        ProbabilityTable::new(
            "starter",
            version,
            1,
            vec![TierWeight::new(Tier::Common, 900_000), TierWeight::new(Tier::Rare, 100_000)],
        )
    }

    fn small_windows() -> GuardConfig {
        GuardConfig {
            interval_window: 8,
            chi_square_window: 100,
            ..GuardConfig::default()
        }
    }

    #[test]
    fn test_burst_detection() {
        let monitor = AntiGamingMonitor::new(small_windows());

        // Human pace
        for i in 0..10 {
            let verdict = monitor.observe("alice", &table(1), Tier::Common, false, i * 1_000).unwrap();
            assert!(!verdict.flagged);
        }

        // Scripted burst
        let start = 10_000;
        let mut flagged = false;
        for i in 0..10 {
            flagged = monitor.observe("alice", &table(1), Tier::Common, false, start + i * 10).unwrap().flagged;
        }
        assert!(flagged);
        let reports = monitor.take_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reason.label(), "rapid_pulls");
        assert!(monitor.take_reports().is_empty());
    }

    #[test]
    fn test_pity_pulls_stay_out_of_tier_window() {
        let monitor = AntiGamingMonitor::new(small_windows());
        for i in 0..50 {
            monitor.observe("bob", &table(1), Tier::Rare, true, i * 1_000).unwrap();
        }
        let profile = monitor.profile("bob").unwrap();
        assert_eq!(profile.observed_pulls, 50);
        assert!(profile.tier_windows.get("starter").is_none());
    }

    #[test]
    fn test_table_change_restarts_window() {
        let monitor = AntiGamingMonitor::new(small_windows());
        for i in 0..60 {
            monitor.observe("carol", &table(1), Tier::Rare, false, i * 1_000).unwrap();
        }
        monitor.observe("carol", &table(2), Tier::Common, false, 61_000).unwrap();

        let profile = monitor.profile("carol").unwrap();
        let window = &profile.tier_windows["starter"];
        assert_eq!(window.table_version, 2);
        assert_eq!(window.len, 1);
    }

    #[test]
    fn test_skewed_stream_is_flagged() {
        let monitor = AntiGamingMonitor::new(small_windows());
        let mut verdict = Verdict::default();
        for i in 0..100 {
            verdict = monitor.observe("dave", &table(1), Tier::Rare, false, i * 1_000).unwrap();
        }
        assert!(verdict.flagged);
        assert!(matches!(verdict.new_reasons[0], FlagReason::OddsDeviation { .. }));
    }

    #[test]
    fn test_unknown_tier_leaves_profile_untouched() {
        let monitor = AntiGamingMonitor::default();
        let err = monitor.observe("erin", &table(1), Tier::Legendary, false, 0).unwrap_err();
        assert!(matches!(err, GuardError::UnknownTier { .. }));
        assert!(monitor.profile("erin").is_none());
    }

    #[test]
    fn test_admission_throttles_only_flagged_accounts() {
        let monitor = AntiGamingMonitor::new(small_windows());
        monitor.observe("frank", &table(1), Tier::Common, false, 0).unwrap();
        assert_eq!(monitor.admission("frank", 1), Admission::Allow);
        assert_eq!(monitor.admission("nobody", 1), Admission::Allow);

        for i in 0..10 {
            monitor.observe("frank", &table(1), Tier::Common, false, i).unwrap();
        }
        assert!(monitor.is_flagged("frank"));
        assert_eq!(monitor.admission("frank", 509), Admission::Throttle { retry_after_ms: 1_500 });
        assert_eq!(monitor.admission("frank", 2_009), Admission::Allow);

        assert_eq!(monitor.flagged_users(), vec!["frank".to_string()]);
        assert!(monitor.clear("frank"));
        assert_eq!(monitor.admission("frank", 10), Admission::Allow);
    }

    #[test]
    fn test_idle_unflagged_profiles_are_evicted() {
        let config = GuardConfig {
            profile_idle_ms: 10_000,
            ..small_windows()
        };
        let monitor = AntiGamingMonitor::new(config);
        monitor.observe("gina", &table(1), Tier::Common, false, 0).unwrap();
        for i in 0..10 {
            monitor.observe("henry", &table(1), Tier::Common, false, i).unwrap();
        }
        assert!(monitor.is_flagged("henry"));
        monitor.observe("ivan", &table(1), Tier::Common, false, 5_000).unwrap();
        assert_eq!(monitor.tracked_users(), 3);

        // gina is idle past the limit, ivan is not, henry is flagged.
        assert_eq!(monitor.evict_idle(12_000), 1);
        assert!(monitor.profile("gina").is_none());
        assert!(monitor.profile("ivan").is_some());
        assert!(monitor.is_flagged("henry"));

        // Once cleared, henry goes the same way.
        assert!(monitor.clear("henry"));
        assert_eq!(monitor.evict_idle(20_000), 2);
        assert_eq!(monitor.tracked_users(), 0);
    }

    #[test]
    fn test_observe_sweeps_once_per_idle_period() {
        let config = GuardConfig {
            profile_idle_ms: 10_000,
            ..small_windows()
        };
        let monitor = AntiGamingMonitor::new(config);
        for (user, at) in [("a", 0), ("b", 1), ("c", 2)] {
            monitor.observe(user, &table(1), Tier::Common, false, at).unwrap();
        }
        monitor.observe("d", &table(1), Tier::Common, false, 9_999).unwrap();
        assert_eq!(monitor.tracked_users(), 4);

        // The first observation past the idle period sweeps a, b and c.
        monitor.observe("e", &table(1), Tier::Common, false, 15_000).unwrap();
        assert_eq!(monitor.tracked_users(), 2);
        assert!(monitor.profile("d").is_some());
        assert_eq!(monitor.profile("e").unwrap().observed_pulls, 1);
    }

    #[test]
    fn test_zero_idle_keeps_everything() {
        let config = GuardConfig {
            profile_idle_ms: 0,
            ..small_windows()
        };
        let monitor = AntiGamingMonitor::new(config);
        monitor.observe("old", &table(1), Tier::Common, false, 0).unwrap();
        monitor.observe("new", &table(1), Tier::Common, false, u64::MAX / 2).unwrap();
        assert_eq!(monitor.evict_idle(u64::MAX), 0);
        assert_eq!(monitor.tracked_users(), 2);
    }
}
