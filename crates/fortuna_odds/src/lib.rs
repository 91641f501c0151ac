//! # FORTUNA Odds
//!
//! The published-odds contract of the FORTUNA reward engine.
//!
//! ## Design Principles
//!
//! 1. **Integer weights** - Tier weights sum to a declared integer total (1,000,000 by default)
//! 2. **Immutable versions** - A published table or pool never changes; new odds are a new version
//! 3. **Pure resolution** - One `u64` draw in, one outcome out, no hidden state
//! 4. **Exact pity** - Guarantees fire on the threshold pull, never later
//!
//! ## Example
//!
//! ```rust,ignore
//! use fortuna_odds::{resolve, Catalog, DrawSource, OsEntropy, PityState};
//!
//! let catalog = Catalog::load("data/catalog.toml")?;
//! let banner = catalog.banner("starter", None)?.expect("pool published");
//!
//! let draw = OsEntropy.next_draw()?;
//! let outcome = resolve(&banner.table, &banner.pool, &PityState::default(), &owned, draw)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod entropy;
pub mod error;
pub mod pity;
pub mod pool;
pub mod resolver;
pub mod simulation;
pub mod table;
pub mod tier;

pub use catalog::{Banner, Catalog, CatalogDocument};
pub use entropy::{DrawSource, OsEntropy, ScriptedDraws, SeededDraws};
pub use error::{OddsError, OddsResult};
pub use pity::PityState;
pub use pool::{DuplicatePolicy, ItemId, RewardItem, RewardPool};
pub use resolver::{resolve, Outcome};
pub use simulation::{simulate, SimulationReport};
pub use table::{PityRule, PoolId, ProbabilityTable, TierInterval, TierWeight, DEFAULT_TOTAL_WEIGHT};
pub use tier::Tier;
