//! # coinduel-battle
//!
//! **Battle plane**: two-player stake escrow, turn submission, settlement
//! and payout, on top of the ledger plane.
//!
//! ## Architecture
//!
//! 1. **BattleManager**: owns `Battle` transitions and calls the ledger for
//!    every coin movement
//! 2. **settlement**: pure verdict function plus the payout it triggers
//! 3. **BattleService**: request/response surface keyed by the caller's
//!    resolved identity
//!
//! ## Battle Flow
//!
//! ```text
//! create  → debit challenger stake → insert PENDING
//! accept  → debit opponent stake   → CAS PENDING → RUNNING
//! submit  → insert turn → snapshot → both turns? → resolve
//!         → CAS RUNNING → FINISHED → payout (winner 2×stake, tie refunds)
//! ```
//!
//! Only the caller whose `RUNNING → FINISHED` update lands pays out; a
//! concurrent loser returns the verdict already persisted.

pub mod api;
pub mod lifecycle;
pub mod settlement;
pub mod telemetry;

pub use api::{BattleService, ErrorBody};
pub use lifecycle::{BattleManager, ListView, SubmitOutcome};
pub use settlement::{PayoutCredit, PayoutReport, payout_plan, resolve};
