//! Identifiers used throughout coinduel.
//!
//! `UserId` is an opaque key handed over by the identity resolver; the core
//! never looks inside it. `BattleId` uses UUIDv7 so battles sort by creation
//! time.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoinduelError, Result};

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Stable opaque identifier for a user, as resolved per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a resolved identity.
    ///
    /// # Errors
    /// Returns `InvalidUserId` if the key is empty or only whitespace.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoinduelError::InvalidUserId);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BattleId
// ---------------------------------------------------------------------------

/// Globally unique battle identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BattleId(pub Uuid);

impl BattleId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BattleId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for BattleId {
    type Err = CoinduelError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoinduelError::InvalidBattleId(s.to_string()))
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
