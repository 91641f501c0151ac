//! # FORTUNA Guard - The Watchtower
//!
//! Advisory anti-gaming analysis of committed pulls.
//!
//! ## Detection Methods
//!
//! - **Pull bursts**: inter-pull intervals below a plausible human/network floor
//! - **Odds deviation**: chi-square test of organic tier frequencies against the
//!   published weights of the table that produced them
//!
//! ## Architecture
//!
//! ```text
//! PULL ENGINE                      GUARD
//!     │                              │
//!     │── commit (lock released) ───►│ observe
//!     │                              │   ├─ interval window
//!     │                              │   └─ organic tier window per pool
//!     │                              │
//!     │◄── admission(user, now) ─────┤ Allow | Throttle
//!     │                              │
//! ```
//!
//! The guard is never consulted while a pull resolves. A flag changes how often a
//! user may pull, never what a pull yields.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod chi_square;
pub mod config;
pub mod error;
pub mod monitor;

pub use chi_square::{critical_value, ChiSquareTest};
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use monitor::{
    Admission, AntiGamingMonitor, AntiGamingProfile, FlagReason, FlagReport, TierWindow, UserId, Verdict,
};
