//! Pull requests and the immutable audit record they produce.

use serde::{Deserialize, Serialize};
use std::fmt;

use fortuna_guard::UserId;
use fortuna_odds::{ItemId, PoolId, Tier};

use crate::error::{EngineResult, PullError};
use crate::store::LedgerKey;

/// Client-chosen idempotency key.
pub type RequestId = String;

/// Longest accepted request or user id.
const MAX_ID_LEN: usize = 128;

/// Longest accepted pool id.
const MAX_POOL_ID_LEN: usize = 64;

/// Longest accepted spend confirmation token.
const MAX_TOKEN_LEN: usize = 4096;

/// A paid pull, authorized by the economy before it reaches the engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Idempotency key.
    pub request_id: RequestId,
    /// Verified user id.
    pub user_id: UserId,
    /// Pool (banner) to pull on.
    pub pool_id: PoolId,
    /// Opaque spend confirmation from the economy.
    pub spend_confirmation_token: String,
    /// Table version pinned at authorization time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_version: Option<u64>,
}

impl PullRequest {
    /// Creates an unpinned request.
    #[must_use]
    pub fn new(
        request_id: impl Into<RequestId>,
        user_id: impl Into<UserId>,
        pool_id: impl Into<PoolId>,
        spend_confirmation_token: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            pool_id: pool_id.into(),
            spend_confirmation_token: spend_confirmation_token.into(),
            table_version: None,
        }
    }

    /// Pins the table version the user was shown.
    #[must_use]
    pub fn pinned(mut self, table_version: u64) -> Self {
        self.table_version = Some(table_version);
        self
    }

    /// Ledger this request advances.
    #[must_use]
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.user_id.clone(), self.pool_id.clone())
    }

    /// Checks request shape and token format. Touches no state.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::InvalidRequest`] naming the first offending field.
    pub fn validate(&self) -> EngineResult<()> {
        check_id("requestId", &self.request_id, MAX_ID_LEN)?;
        check_id("userId", &self.user_id, MAX_ID_LEN)?;
        check_id("poolId", &self.pool_id, MAX_POOL_ID_LEN)?;

        let token = &self.spend_confirmation_token;
        if token.is_empty() {
            return Err(PullError::InvalidRequest("spendConfirmationToken is empty".to_string()));
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(PullError::InvalidRequest(format!(
                "spendConfirmationToken exceeds {MAX_TOKEN_LEN} bytes"
            )));
        }
        if !token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(PullError::InvalidRequest(
                "spendConfirmationToken must be printable ASCII without spaces".to_string(),
            ));
        }
        Ok(())
    }

    /// True if `result` was produced by a request for the same user and pool.
    #[must_use]
    pub fn matches(&self, result: &PullResult) -> bool {
        result.user_id == self.user_id && result.pool_id == self.pool_id
    }
}

impl fmt::Debug for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullRequest")
            .field("request_id", &self.request_id)
            .field("user_id", &self.user_id)
            .field("pool_id", &self.pool_id)
            .field("spend_confirmation_token", &"[REDACTED]")
            .field("table_version", &self.table_version)
            .finish()
    }
}

fn check_id(field: &str, value: &str, max_len: usize) -> EngineResult<()> {
    if value.is_empty() {
        return Err(PullError::InvalidRequest(format!("{field} is empty")));
    }
    if value.len() > max_len {
        return Err(PullError::InvalidRequest(format!("{field} exceeds {max_len} bytes")));
    }
    if !value.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':')) {
        return Err(PullError::InvalidRequest(format!(
            "{field} may only contain ASCII letters, digits, '-', '_', '.' and ':'"
        )));
    }
    Ok(())
}

/// Immutable audit record of one committed pull.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Request that produced it.
    pub request_id: RequestId,
    /// Owner.
    pub user_id: UserId,
    /// Pool pulled on.
    pub pool_id: PoolId,
    /// Table version that resolved it.
    pub table_version: u64,
    /// Pool version the item came from.
    pub pool_version: u64,
    /// Tier reached.
    pub outcome_tier: Tier,
    /// Item awarded.
    pub item_id: ItemId,
    /// Whether the pity guarantee forced it.
    pub pity_triggered: bool,
    /// Whether the conversion item replaced an exhausted tier.
    pub converted: bool,
    /// Commit time, ms since the Unix epoch.
    pub timestamp: u64,
    /// Position in the `(user, pool)` history, starting at 1.
    pub sequence_number: u64,
}

impl PullResult {
    /// Ledger this result belongs to.
    #[must_use]
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.user_id.clone(), self.pool_id.clone())
    }
}
