//! # coinduel-store
//!
//! **Persistent store boundary.**
//!
//! Every request is an independent, stateless invocation; the only place
//! they meet is the store. Coordination is therefore expressed as
//! conditional writes that report how many rows they touched:
//!
//! - **Balances**: compare-and-swap on `coins`, plus an unconditional write
//!   used by the ledger's fallback path
//! - **Battles**: `Pending → Running` and `Running → Finished` as guarded
//!   updates on `status`
//! - **Turns**: one row per `(battle, player)`, enforced as a unique key
//!
//! [`MemoryStore`] implements these semantics in process. With the
//! `test-helpers` feature, [`FaultyStore`] wraps any store to inject the
//! failures the engine must survive.

use chrono::{DateTime, Utc};
use coinduel_types::{
    Battle, BattleId, LedgerEntry, Result, Side, SideSnapshot, Turn, UserId, UserRow, Verdict,
};

#[cfg(any(test, feature = "test-helpers"))]
pub mod faulty;
pub mod memory;

#[cfg(any(test, feature = "test-helpers"))]
pub use faulty::FaultyStore;
pub use memory::MemoryStore;

/// Which battles a listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleFilter {
    /// Battles where the user is challenger or opponent.
    Participant(UserId),
    /// Pending, unassigned battles the user did not create.
    OpenFor(UserId),
}

impl BattleFilter {
    #[must_use]
    pub fn matches(&self, battle: &Battle) -> bool {
        match self {
            Self::Participant(user) => battle.side_of(user).is_some(),
            Self::OpenFor(user) => battle.is_open_for(user),
        }
    }
}

/// Relational store contract used by the ledger and battle planes.
///
/// Methods returning `u64` report rows affected; `0` means the guard did not
/// match and nothing was written.
pub trait Store: Send + Sync {
    // ---------------------------------------------------------------
    // Users / balances
    // ---------------------------------------------------------------

    /// Create or replace a user row.
    fn insert_user(&self, row: UserRow) -> Result<()>;

    fn read_user(&self, user: &UserId) -> Result<Option<UserRow>>;

    /// `SET coins = new WHERE id = user AND coins = expected`.
    /// A null column never equals `expected`.
    fn compare_and_swap_coins(&self, user: &UserId, expected: i64, new: i64) -> Result<u64>;

    /// `SET coins = new WHERE id = user`.
    fn write_coins(&self, user: &UserId, new: i64) -> Result<u64>;

    // ---------------------------------------------------------------
    // Ledger
    // ---------------------------------------------------------------

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()>;

    /// Entries for a user in insertion order.
    fn ledger_entries(&self, user: &UserId) -> Result<Vec<LedgerEntry>>;

    /// Entries for a referenced entity in insertion order.
    fn ledger_entries_for_ref(&self, ref_type: &str, ref_id: &str) -> Result<Vec<LedgerEntry>>;

    // ---------------------------------------------------------------
    // Battles
    // ---------------------------------------------------------------

    fn insert_battle(&self, battle: Battle) -> Result<()>;

    fn read_battle(&self, id: BattleId) -> Result<Option<Battle>>;

    /// `Pending → Running`, guarded on `status = Pending` and the opponent
    /// seat being empty or already reserved for `acceptor`.
    fn mark_running(&self, id: BattleId, acceptor: &UserId, at: DateTime<Utc>) -> Result<u64>;

    /// Write one side's partial result. Does not touch `status`.
    fn write_side_snapshot(
        &self,
        id: BattleId,
        side: Side,
        snapshot: &SideSnapshot,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// `Running → Finished` with the verdict, guarded on `status = Running`.
    fn mark_finished(&self, id: BattleId, verdict: &Verdict, at: DateTime<Utc>) -> Result<u64>;

    /// Matching battles, newest first.
    fn list_battles(&self, filter: &BattleFilter) -> Result<Vec<Battle>>;

    // ---------------------------------------------------------------
    // Turns
    // ---------------------------------------------------------------

    /// Insert a turn. Fails `AlreadySubmitted` if `(battle, player)` exists.
    fn insert_turn(&self, turn: Turn) -> Result<()>;

    fn turns_for_battle(&self, id: BattleId) -> Result<Vec<Turn>>;
}
