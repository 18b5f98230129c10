//! Error types for the coinduel ledger and battle engine.
//!
//! All errors use the `CD_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Request validation errors
//! - 2xx: Ledger errors
//! - 3xx: Battle lifecycle errors
//! - 4xx: Settlement errors
//! - 9xx: Store / internal errors
//!
//! Callers never see the numeric prefix; they get the machine code from
//! [`CoinduelError::code`] plus the display message.

use thiserror::Error;

use crate::{BattleId, UserId};

/// How an error should be treated by whoever receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape. Surfaced immediately, never retried.
    Validation,
    /// Business rule rejection. Surfaced with the triggering state attached.
    Domain,
    /// Lost an optimistic race. Retried internally a bounded number of times.
    Transient,
    /// The primary mutation is durable but a follow-up step failed and needs
    /// reconciliation.
    Recoverable,
    /// The store itself failed.
    Infrastructure,
}

/// Central error enum for all coinduel operations.
#[derive(Debug, Error)]
pub enum CoinduelError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The resolved user identity was empty.
    #[error("CD_ERR_100: User id must not be empty")]
    InvalidUserId,

    /// `unitId` missing or blank on battle creation.
    #[error("CD_ERR_101: Unit id is required")]
    InvalidUnitId,

    /// Round count must be positive.
    #[error("CD_ERR_102: Invalid round count: {0}")]
    InvalidRoundCount(i64),

    /// The battle was created without a task bundle.
    #[error("CD_ERR_103: A non-empty task bundle is required")]
    TaskBundleRequired,

    /// A battle id that does not parse.
    #[error("CD_ERR_104: Invalid battle id: {0:?}")]
    InvalidBattleId(String),

    /// Stakes are whole coins and never negative.
    #[error("CD_ERR_105: Invalid stake: {0}")]
    InvalidStake(i64),

    /// The submitted result counts are inconsistent.
    #[error("CD_ERR_106: Invalid submission: {reason}")]
    InvalidSubmission { reason: String },

    // =================================================================
    // Ledger Errors (2xx)
    // =================================================================
    /// Applying the delta would leave the balance negative.
    #[error("CD_ERR_200: Insufficient coins: balance {previous}, delta {delta}")]
    InsufficientFunds { previous: i64, delta: i64 },

    /// Both the optimistic and the fallback write affected no rows.
    #[error("CD_ERR_201: Coin balance changed concurrently (last seen {previous})")]
    ConcurrentUpdateConflict { previous: i64 },

    /// No user row exists for this id.
    #[error("CD_ERR_202: User not found: {0}")]
    UserNotFound(UserId),

    /// Stored balance disagrees with the audit trail.
    #[error("CD_ERR_203: Ledger drift for {user}: ledger says {expected}, stored {actual}")]
    LedgerDrift {
        user: UserId,
        expected: i64,
        actual: i64,
    },

    // =================================================================
    // Battle Errors (3xx)
    // =================================================================
    #[error("CD_ERR_300: Battle not found: {0}")]
    BattleNotFound(BattleId),

    /// Accept was attempted on a battle that is no longer pending.
    #[error("CD_ERR_301: Battle {0} is not open")]
    BattleNotOpen(BattleId),

    #[error("CD_ERR_302: Cannot accept your own battle")]
    CannotAcceptOwnBattle,

    /// The battle was addressed to a different opponent.
    #[error("CD_ERR_303: Battle {0} is assigned to another opponent")]
    BattleAlreadyAssigned(BattleId),

    #[error("CD_ERR_304: {player} is not a participant of battle {battle_id}")]
    NotParticipant { battle_id: BattleId, player: UserId },

    #[error("CD_ERR_305: Battle {0} is already finished")]
    BattleFinished(BattleId),

    #[error("CD_ERR_306: Battle {0} has not been accepted yet")]
    BattleNotAccepted(BattleId),

    /// A turn already exists for this (battle, player). Also raised by the
    /// store when its unique constraint rejects a concurrent duplicate.
    #[error("CD_ERR_307: {player} already submitted for battle {battle_id}")]
    AlreadySubmitted { battle_id: BattleId, player: UserId },

    // =================================================================
    // Settlement Errors (4xx)
    // =================================================================
    /// The battle is finished but one or more payout credits failed.
    #[error("CD_ERR_400: Payout incomplete for battle {battle_id}: failed credits for {failed:?}")]
    PayoutIncomplete {
        battle_id: BattleId,
        failed: Vec<UserId>,
    },

    // =================================================================
    // Store / Internal (9xx)
    // =================================================================
    #[error("CD_ERR_900: Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("CD_ERR_901: Internal error: {0}")]
    Internal(String),

    #[error("CD_ERR_902: Serialization error: {0}")]
    Serialization(String),

    #[error("CD_ERR_903: Configuration error: {0}")]
    Configuration(String),
}

impl CoinduelError {
    /// Machine-readable code surfaced to callers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUserId => "INVALID_USER_ID",
            Self::InvalidUnitId => "INVALID_UNIT_ID",
            Self::InvalidRoundCount(_) => "INVALID_ROUND_COUNT",
            Self::TaskBundleRequired => "TASK_BUNDLE_REQUIRED",
            Self::InvalidBattleId(_) => "INVALID_BATTLE_ID",
            Self::InvalidStake(_) => "INVALID_STAKE",
            Self::InvalidSubmission { .. } => "INVALID_SUBMISSION",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_COINS",
            Self::ConcurrentUpdateConflict { .. } => "COIN_UPDATE_CONFLICT",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::LedgerDrift { .. } => "LEDGER_DRIFT",
            Self::BattleNotFound(_) => "BATTLE_NOT_FOUND",
            Self::BattleNotOpen(_) => "BATTLE_NOT_OPEN",
            Self::CannotAcceptOwnBattle => "CANNOT_ACCEPT_OWN_BATTLE",
            Self::BattleAlreadyAssigned(_) => "BATTLE_ALREADY_ASSIGNED",
            Self::NotParticipant { .. } => "NOT_PARTICIPANT",
            Self::BattleFinished(_) => "BATTLE_FINISHED",
            Self::BattleNotAccepted(_) => "BATTLE_NOT_ACCEPTED",
            Self::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
            Self::PayoutIncomplete { .. } => "PAYOUT_INCOMPLETE",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUserId
            | Self::InvalidUnitId
            | Self::InvalidRoundCount(_)
            | Self::TaskBundleRequired
            | Self::InvalidBattleId(_)
            | Self::InvalidStake(_)
            | Self::InvalidSubmission { .. } => ErrorKind::Validation,
            Self::ConcurrentUpdateConflict { .. } => ErrorKind::Transient,
            Self::PayoutIncomplete { .. } | Self::LedgerDrift { .. } => ErrorKind::Recoverable,
            Self::StoreUnavailable(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Domain,
        }
    }

    /// Only lost optimistic races are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Balance observed when a financial operation failed, if any.
    #[must_use]
    pub fn previous_balance(&self) -> Option<i64> {
        match self {
            Self::InsufficientFunds { previous, .. }
            | Self::ConcurrentUpdateConflict { previous } => Some(*previous),
            _ => None,
        }
    }

    /// Errors whose response should report the caller's balances.
    #[must_use]
    pub fn is_financial(&self) -> bool {
        self.previous_balance().is_some() || matches!(self, Self::PayoutIncomplete { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CoinduelError>;

impl From<serde_json::Error> for CoinduelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = CoinduelError::BattleNotFound(BattleId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("CD_ERR_300"), "Got: {msg}");
    }

    #[test]
    fn insufficient_funds_display_and_code() {
        let err = CoinduelError::InsufficientFunds {
            previous: 3,
            delta: -5,
        };
        let msg = format!("{err}");
        assert!(msg.contains("CD_ERR_200"));
        assert!(msg.contains('3'));
        assert_eq!(err.code(), "INSUFFICIENT_COINS");
        assert_eq!(err.previous_balance(), Some(3));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(CoinduelError::ConcurrentUpdateConflict { previous: 1 }.is_retryable());
        assert!(!CoinduelError::InvalidUnitId.is_retryable());
        assert!(!CoinduelError::CannotAcceptOwnBattle.is_retryable());
        assert!(!CoinduelError::StoreUnavailable("down".into()).is_retryable());
    }

    #[test]
    fn financial_errors() {
        assert!(CoinduelError::InsufficientFunds { previous: 1, delta: -2 }.is_financial());
        assert!(CoinduelError::ConcurrentUpdateConflict { previous: 4 }.is_financial());
        assert!(
            CoinduelError::PayoutIncomplete {
                battle_id: BattleId::new(),
                failed: vec![],
            }
            .is_financial()
        );
        assert!(!CoinduelError::BattleNotOpen(BattleId::new()).is_financial());
        assert!(!CoinduelError::StoreUnavailable("down".into()).is_financial());
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(CoinduelError::TaskBundleRequired.kind(), ErrorKind::Validation);
        assert_eq!(
            CoinduelError::BattleNotOpen(BattleId::new()).kind(),
            ErrorKind::Domain
        );
        assert_eq!(
            CoinduelError::PayoutIncomplete {
                battle_id: BattleId::new(),
                failed: vec![],
            }
            .kind(),
            ErrorKind::Recoverable
        );
    }

    #[test]
    fn all_errors_have_cd_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(CoinduelError::InvalidUnitId),
            Box::new(CoinduelError::CannotAcceptOwnBattle),
            Box::new(CoinduelError::ConcurrentUpdateConflict { previous: 0 }),
            Box::new(CoinduelError::Internal("test".into())),
            Box::new(CoinduelError::InvalidSubmission {
                reason: "x".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("CD_ERR_"),
                "Error missing CD_ERR_ prefix: {msg}"
            );
        }
    }
}
