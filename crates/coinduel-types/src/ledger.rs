//! Coin balance and audit trail types.
//!
//! Every user has a single whole-coin balance. `coins` is the only globally
//! shared mutable resource in the system and only the ledger service writes
//! it; every write is followed by a best-effort [`LedgerEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user row as held by the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    /// `None` models a null / uninitialised column. Readers treat it as 0.
    pub coins: Option<i64>,
}

impl UserRow {
    #[must_use]
    pub fn new(id: UserId, coins: i64) -> Self {
        Self {
            id,
            coins: Some(coins),
        }
    }

    /// Balance with null read as zero.
    #[must_use]
    pub fn balance(&self) -> i64 {
        self.coins.unwrap_or(0)
    }
}

/// Append-only audit record of one balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub delta: i64,
    pub reason: String,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    /// Set when the balance was written through the unconditional fallback
    /// path, i.e. inside the documented lost-update window.
    #[serde(default)]
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this entry refers to the given `(ref_type, ref_id)`.
    #[must_use]
    pub fn refers_to(&self, ref_type: &str, ref_id: &str) -> bool {
        self.ref_type.as_deref() == Some(ref_type) && self.ref_id.as_deref() == Some(ref_id)
    }
}

/// Outcome of a successful `apply_delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub previous: i64,
    pub updated: i64,
}

/// Why a balance moved, plus the optional entity it moved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaReason {
    pub reason: String,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
}

impl DeltaReason {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ref_type: None,
            ref_id: None,
        }
    }

    #[must_use]
    pub fn with_ref(mut self, ref_type: impl Into<String>, ref_id: impl ToString) -> Self {
        self.ref_type = Some(ref_type.into());
        self.ref_id = Some(ref_id.to_string());
        self
    }
}
