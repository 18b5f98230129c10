//! # coinduel-types
//!
//! Shared types, errors, and configuration for the **coinduel** ledger and
//! battle engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`UserId`], [`BattleId`]
//! - **Ledger model**: [`UserRow`], [`LedgerEntry`], [`BalanceChange`], [`DeltaReason`]
//! - **Battle model**: [`Battle`], [`BattleStatus`], [`ResultReason`], [`Side`], [`Verdict`]
//! - **Turn model**: [`Turn`], [`Submission`], [`SubmissionInput`], [`SubmissionSummary`]
//! - **Configuration**: [`EngineConfig`], [`LedgerConfig`], [`TelemetryConfig`]
//! - **Errors**: [`CoinduelError`] with `CD_ERR_` prefix codes
//! - **Constants**: defaults and ledger reason strings

pub mod battle;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod turn;

pub use battle::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use ledger::*;
pub use turn::*;

// Constants are accessed via `coinduel_types::constants::FOO`
// (not re-exported to avoid name collisions).
