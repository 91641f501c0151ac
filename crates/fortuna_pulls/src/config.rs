//! # Service Configuration
//!
//! ```toml
//! [engine]
//! lock_timeout_ms = 2000
//! commit_attempts = 5
//!
//! [guard]
//! min_interval_ms = 250
//! ```
//!
//! Every field has a default; an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use fortuna_guard::GuardConfig;

use crate::error::{EngineResult, PullError};

/// Engine tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest wait for a `(user, pool)` exclusive section.
    pub lock_timeout_ms: u64,
    /// Shards of the key lock table.
    pub lock_shards: usize,
    /// Attempts per pull before a transient failure is surfaced.
    pub commit_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Retry delay cap.
    pub backoff_max_ms: u64,
    /// Attempts per event delivery.
    pub delivery_attempts: u32,
    /// Delay between event delivery attempts.
    pub delivery_backoff_ms: u64,
    /// Threads executing submitted pulls.
    pub service_workers: usize,
    /// Submitted pulls allowed to wait for a worker.
    pub max_pending: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            lock_shards: 64,
            commit_attempts: 5,
            backoff_base_ms: 5,
            backoff_max_ms: 200,
            delivery_attempts: 3,
            delivery_backoff_ms: 20,
            service_workers: 4,
            max_pending: 10_000,
        }
    }
}

impl EngineConfig {
    /// Lock wait as a duration.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based): exponential, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms))
    }
}

/// Full service configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FortunaConfig {
    /// Engine tuning.
    pub engine: EngineConfig,
    /// Anti-gaming thresholds.
    pub guard: GuardConfig,
}

impl FortunaConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::InvalidConfig`] on parse failure or nonsensical values.
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| PullError::InvalidConfig(format!("config parse failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::InvalidConfig`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| PullError::InvalidConfig(format!("failed to read config {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Rejects values that would stop the service from ever completing a pull.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> EngineResult<()> {
        let engine = &self.engine;
        if engine.commit_attempts == 0 {
            return Err(PullError::InvalidConfig("engine.commit_attempts must be at least 1".into()));
        }
        if engine.delivery_attempts == 0 {
            return Err(PullError::InvalidConfig("engine.delivery_attempts must be at least 1".into()));
        }
        if engine.service_workers == 0 {
            return Err(PullError::InvalidConfig("engine.service_workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.guard.burst_ratio) {
            return Err(PullError::InvalidConfig("guard.burst_ratio must lie in [0, 1]".into()));
        }
        let guard = &self.guard;
        if guard.profile_idle_ms != 0 && guard.profile_idle_ms < guard.min_interval_ms {
            return Err(PullError::InvalidConfig(
                "guard.profile_idle_ms must be 0 or at least guard.min_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
