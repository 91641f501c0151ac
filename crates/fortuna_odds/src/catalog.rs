//! # Catalog
//!
//! Append-only registry of published tables and pools.
//!
//! Every published version is stored behind an `Arc` and never touched again, so
//! in-flight pulls keep resolving against the version they pinned while a new
//! version goes live. "Live odds updates" are simply new versions.
//!
//! ## TOML Format
//!
//! ```toml
//! [[pools]]
//! pool_id = "starter"
//! version = 1
//! duplicate_policy = "exclude_owned"
//! conversion_item = 9000
//! items = [
//!     { item_id = 1, tier = "Common" },
//!     { item_id = 2, tier = "Rare", bias_weight = 3 },
//! ]
//!
//! [[tables]]
//! pool_id = "starter"
//! version = 1
//! pool_version = 1
//! weights = [
//!     { tier = "Common", weight = 900000 },
//!     { tier = "Rare", weight = 100000 },
//! ]
//! pity = [{ tier = "Rare", threshold = 10 }]
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::{OddsError, OddsResult};
use crate::pool::RewardPool;
use crate::table::{PoolId, ProbabilityTable};

/// A table together with the pool version it is paired with.
#[derive(Clone, Debug)]
pub struct Banner {
    /// The odds.
    pub table: Arc<ProbabilityTable>,
    /// The items.
    pub pool: Arc<RewardPool>,
}

/// Serialized catalog contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Pool versions, published first.
    #[serde(default)]
    pub pools: Vec<RewardPool>,
    /// Table versions, published after their pools.
    #[serde(default)]
    pub tables: Vec<ProbabilityTable>,
}

type Versions<T> = HashMap<PoolId, BTreeMap<u64, Arc<T>>>;

/// Versioned registry of tables and pools.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<Versions<ProbabilityTable>>,
    pools: RwLock<Versions<RewardPool>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from a parsed document.
    ///
    /// # Errors
    ///
    /// Returns the first [`OddsError::Config`] raised while publishing.
    pub fn from_document(document: CatalogDocument) -> OddsResult<Self> {
        let catalog = Self::new();
        for pool in document.pools {
            catalog.publish_pool(pool)?;
        }
        for table in document.tables {
            catalog.publish_table(table)?;
        }
        Ok(catalog)
    }

    /// Parses a TOML catalog.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] on parse or validation failure.
    pub fn from_toml_str(source: &str) -> OddsResult<Self> {
        let document: CatalogDocument = toml::from_str(source)
            .map_err(|e| OddsError::Config(format!("catalog parse failed: {e}")))?;
        Self::from_document(document)
    }

    /// Loads a TOML catalog from disk.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> OddsResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| OddsError::Config(format!("failed to read catalog {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Publishes a new pool version.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] if the pool is invalid or its version does not
    /// exceed the latest published one.
    pub fn publish_pool(&self, pool: RewardPool) -> OddsResult<Arc<RewardPool>> {
        pool.validate()?;

        let mut pools = self.pools.write();
        let versions = pools.entry(pool.pool_id.clone()).or_default();
        if let Some((&latest, _)) = versions.last_key_value() {
            if pool.version <= latest {
                return Err(OddsError::Config(format!(
                    "pool {} v{} is not newer than published v{latest}",
                    pool.pool_id, pool.version
                )));
            }
        }

        let pool = Arc::new(pool);
        versions.insert(pool.version, Arc::clone(&pool));
        tracing::info!(pool_id = %pool.pool_id, version = pool.version, "reward pool published");
        Ok(pool)
    }

    /// Publishes a new table version against an already published pool version.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] if the table is invalid, its version does not
    /// exceed the latest one, its paired pool is missing, or a tier has no items.
    pub fn publish_table(&self, table: ProbabilityTable) -> OddsResult<Arc<ProbabilityTable>> {
        table.validate()?;

        let pool = self.pool(&table.pool_id, table.pool_version).ok_or_else(|| {
            OddsError::Config(format!(
                "table {} v{} pairs with unpublished pool v{}",
                table.pool_id, table.version, table.pool_version
            ))
        })?;

        if let Some(tier) = table.tiers().find(|&tier| !pool.has_tier(tier)) {
            return Err(OddsError::Config(format!(
                "table {} v{} awards {tier} but pool v{} has no {tier} items",
                table.pool_id, table.version, pool.version
            )));
        }

        let mut tables = self.tables.write();
        let versions = tables.entry(table.pool_id.clone()).or_default();
        if let Some((&latest, _)) = versions.last_key_value() {
            if table.version <= latest {
                return Err(OddsError::Config(format!(
                    "table {} v{} is not newer than published v{latest}",
                    table.pool_id, table.version
                )));
            }
        }

        let table = Arc::new(table);
        versions.insert(table.version, Arc::clone(&table));
        tracing::info!(
            pool_id = %table.pool_id,
            version = table.version,
            pool_version = table.pool_version,
            "probability table published"
        );
        Ok(table)
    }

    /// Returns a specific table version.
    #[must_use]
    pub fn table(&self, pool_id: &str, version: u64) -> Option<Arc<ProbabilityTable>> {
        self.tables.read().get(pool_id)?.get(&version).cloned()
    }

    /// Returns a specific pool version.
    #[must_use]
    pub fn pool(&self, pool_id: &str, version: u64) -> Option<Arc<RewardPool>> {
        self.pools.read().get(pool_id)?.get(&version).cloned()
    }

    /// Latest published table version for a pool.
    #[must_use]
    pub fn latest_table_version(&self, pool_id: &str) -> Option<u64> {
        self.tables
            .read()
            .get(pool_id)?
            .last_key_value()
            .map(|(&version, _)| version)
    }

    /// Resolves the banner for a pull: the pinned table version, or the latest one.
    ///
    /// Returns `Ok(None)` when the pool or the pinned version is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Config`] if a published table points at a missing pool.
    pub fn banner(&self, pool_id: &str, pinned_version: Option<u64>) -> OddsResult<Option<Banner>> {
        let table = match pinned_version {
            Some(version) => self.table(pool_id, version),
            None => self
                .latest_table_version(pool_id)
                .and_then(|version| self.table(pool_id, version)),
        };
        let Some(table) = table else {
            return Ok(None);
        };

        let pool = self.pool(pool_id, table.pool_version).ok_or_else(|| {
            OddsError::Config(format!(
                "table {pool_id} v{} is paired with missing pool v{}",
                table.version, table.pool_version
            ))
        })?;

        Ok(Some(Banner { table, pool }))
    }
}
