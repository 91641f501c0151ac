//! # Draw Sources
//!
//! Where the single `u64` draw of each pull comes from.
//!
//! - [`OsEntropy`]: production source. Every draw seeds a fresh ChaCha20 stream from
//!   the operating system, so no two requests ever share a seed.
//! - [`SeededDraws`]: one seeded ChaCha20 stream, for odds audits and simulations.
//! - [`ScriptedDraws`]: a fixed sequence, for replaying a known pull history.
//!
//! **NEVER** wire `SeededDraws` or `ScriptedDraws` into a live engine: a
//! predictable draw lets a client time its pulls.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;

use crate::error::{OddsError, OddsResult};

/// Produces one random draw per pull.
pub trait DrawSource: Send + Sync {
    /// Returns the next draw.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Entropy`] if no draw can be produced.
    fn next_draw(&self) -> OddsResult<u64>;
}

/// Cryptographically strong draws, independently seeded per call.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl DrawSource for OsEntropy {
    fn next_draw(&self) -> OddsResult<u64> {
        let mut rng = ChaCha20Rng::from_rng(OsRng).map_err(|e| OddsError::Entropy(e.to_string()))?;
        Ok(rng.next_u64())
    }
}

/// Deterministic ChaCha20 stream.
pub struct SeededDraws {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededDraws {
    /// Creates a stream from a 64-bit seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl DrawSource for SeededDraws {
    fn next_draw(&self) -> OddsResult<u64> {
        Ok(self.rng.lock().next_u64())
    }
}

impl std::fmt::Debug for SeededDraws {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The stream position is as good as the seed to an attacker.
        f.debug_struct("SeededDraws").field("rng", &"[REDACTED]").finish()
    }
}

/// Replays a fixed sequence of draws.
#[derive(Debug, Default)]
pub struct ScriptedDraws {
    draws: Mutex<VecDeque<u64>>,
}

impl ScriptedDraws {
    /// Creates a script.
    #[must_use]
    pub fn new(draws: impl IntoIterator<Item = u64>) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
        }
    }

    /// Appends draws to the end of the script.
    pub fn extend(&self, draws: impl IntoIterator<Item = u64>) {
        self.draws.lock().extend(draws);
    }

    /// Draws not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.draws.lock().len()
    }
}

impl DrawSource for ScriptedDraws {
    fn next_draw(&self) -> OddsResult<u64> {
        self.draws
            .lock()
            .pop_front()
            .ok_or_else(|| OddsError::Entropy("draw script exhausted".to_string()))
    }
}
