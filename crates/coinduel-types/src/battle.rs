//! # Battle: the two-player escrow record
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  accept   ┌─────────┐  both turns in   ┌──────────┐
//!   │ PENDING ├──────────▶│ RUNNING ├─────────────────▶│ FINISHED │
//!   └─────────┘           └─────────┘                  └──────────┘
//! ```
//!
//! Transitions are monotonic: no skipping, no reversal. Both edges are
//! applied by the store as conditional updates on `status`, so concurrent
//! callers cannot both take the same edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BattleId, SubmissionSummary, UserId};

/// Lifecycle state of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    /// Created by the challenger, stake escrowed, waiting for an opponent.
    Pending,
    /// Opponent accepted and escrowed; waiting for both turns.
    Running,
    /// Verdict persisted and payout triggered. Terminal.
    Finished,
}

impl BattleStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Running) | (Self::Running, Self::Finished)
        )
    }
}

impl std::fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Why a battle ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultReason {
    Score,
    Time,
    Tie,
}

impl std::fmt::Display for ResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Score => write!(f, "score"),
            Self::Time => write!(f, "time"),
            Self::Tie => write!(f, "tie"),
        }
    }
}

/// Which seat a participant occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Challenger,
    Opponent,
}

impl Side {
    /// Stable turn index for this seat.
    #[must_use]
    pub fn index(self) -> u32 {
        match self {
            Self::Challenger => 0,
            Self::Opponent => 1,
        }
    }
}

/// Settlement outcome. `winner_id` is `None` exactly when the reason is `Tie`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub winner_id: Option<UserId>,
    pub result_reason: ResultReason,
}

impl Verdict {
    #[must_use]
    pub fn tie() -> Self {
        Self {
            winner_id: None,
            result_reason: ResultReason::Tie,
        }
    }

    #[must_use]
    pub fn win(winner: UserId, reason: ResultReason) -> Self {
        Self {
            winner_id: Some(winner),
            result_reason: reason,
        }
    }
}

/// Partial result for one side, written when that side submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideSnapshot {
    pub score: u32,
    pub time_ms: Option<u64>,
    pub summary: SubmissionSummary,
}

impl From<SubmissionSummary> for SideSnapshot {
    fn from(summary: SubmissionSummary) -> Self {
        Self {
            score: summary.correct,
            time_ms: summary.time_ms,
            summary,
        }
    }
}

/// Everything the challenger provides when opening a battle.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleSetup {
    pub scenario_id: Option<String>,
    pub unit_id: String,
    pub unit_title: Option<String>,
    pub stake: i64,
    pub round_count: i64,
    pub task_ids: Vec<String>,
    pub task_bundle: Value,
    pub opponent_id: Option<UserId>,
    pub metadata: Option<Value>,
}

/// A battle row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    pub id: BattleId,
    pub challenger_id: UserId,
    pub opponent_id: Option<UserId>,
    pub scenario_id: Option<String>,
    pub unit_id: String,
    pub unit_title: Option<String>,
    pub stake: i64,
    pub round_count: u32,
    pub task_ids: Vec<String>,
    pub task_bundle: Value,
    pub metadata: Option<Value>,
    pub status: BattleStatus,
    pub winner_id: Option<UserId>,
    pub result_reason: Option<ResultReason>,
    pub challenger_score: Option<u32>,
    pub opponent_score: Option<u32>,
    pub challenger_time_ms: Option<u64>,
    pub opponent_time_ms: Option<u64>,
    pub challenger_summary: Option<SubmissionSummary>,
    pub opponent_summary: Option<SubmissionSummary>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
}

impl Battle {
    /// Build a fresh `Pending` battle. Validation happens in the lifecycle
    /// manager; this only lays out the row.
    #[must_use]
    pub fn pending(
        id: BattleId,
        challenger_id: UserId,
        round_count: u32,
        setup: BattleSetup,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            challenger_id,
            opponent_id: setup.opponent_id,
            scenario_id: setup.scenario_id,
            unit_id: setup.unit_id,
            unit_title: setup.unit_title,
            stake: setup.stake,
            round_count,
            task_ids: setup.task_ids,
            task_bundle: setup.task_bundle,
            metadata: setup.metadata,
            status: BattleStatus::Pending,
            winner_id: None,
            result_reason: None,
            challenger_score: None,
            opponent_score: None,
            challenger_time_ms: None,
            opponent_time_ms: None,
            challenger_summary: None,
            opponent_summary: None,
            created_at: now,
            accepted_at: None,
            finished_at: None,
            last_event_at: now,
        }
    }

    /// Seat occupied by `user`, if any.
    #[must_use]
    pub fn side_of(&self, user: &UserId) -> Option<Side> {
        if &self.challenger_id == user {
            Some(Side::Challenger)
        } else if self.opponent_id.as_ref() == Some(user) {
            Some(Side::Opponent)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == BattleStatus::Finished
    }

    /// Persisted verdict, present once the battle is finished.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.result_reason.map(|result_reason| Verdict {
            winner_id: self.winner_id.clone(),
            result_reason,
        })
    }

    /// Open for anyone but `caller` to accept.
    #[must_use]
    pub fn is_open_for(&self, caller: &UserId) -> bool {
        self.status == BattleStatus::Pending
            && self.opponent_id.is_none()
            && &self.challenger_id != caller
    }

    /// Record a side's partial result on the row.
    pub fn record_snapshot(&mut self, side: Side, snapshot: &SideSnapshot, at: DateTime<Utc>) {
        match side {
            Side::Challenger => {
                self.challenger_score = Some(snapshot.score);
                self.challenger_time_ms = snapshot.time_ms;
                self.challenger_summary = Some(snapshot.summary);
            }
            Side::Opponent => {
                self.opponent_score = Some(snapshot.score);
                self.opponent_time_ms = snapshot.time_ms;
                self.opponent_summary = Some(snapshot.summary);
            }
        }
        self.last_event_at = at;
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl BattleSetup {
    /// Minimal valid setup for tests.
    pub fn simple(stake: i64) -> Self {
        Self {
            scenario_id: None,
            unit_id: "unit-1".to_string(),
            unit_title: Some("Fractions".to_string()),
            stake,
            round_count: 5,
            task_ids: vec!["t1".to_string(), "t2".to_string()],
            task_bundle: serde_json::json!({"tasks": ["t1", "t2"]}),
            opponent_id: None,
            metadata: None,
        }
    }
}
