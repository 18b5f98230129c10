//! In-process store backend.
//!
//! Each table sits behind its own mutex; every trait method takes exactly
//! one lock, so a conditional update is atomic with respect to every other
//! call on the same table, the way a single-row `UPDATE ... WHERE` is in a
//! relational store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use coinduel_types::{
    Battle, BattleId, BattleStatus, CoinduelError, LedgerEntry, Result, Side, SideSnapshot, Turn,
    UserId, UserRow, Verdict,
};

use crate::{BattleFilter, Store};

fn lock<T>(table: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    table
        .lock()
        .map_err(|_| CoinduelError::Internal("store table lock poisoned".into()))
}

/// Thread-safe in-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<UserId, UserRow>>,
    /// Append-only; insertion order is the audit order.
    ledger: Mutex<Vec<LedgerEntry>>,
    battles: Mutex<HashMap<BattleId, Battle>>,
    /// Keyed by the unique `(battle, player)` pair.
    turns: Mutex<HashMap<(BattleId, UserId), Turn>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_user(&self, row: UserRow) -> Result<()> {
        lock(&self.users)?.insert(row.id.clone(), row);
        Ok(())
    }

    fn read_user(&self, user: &UserId) -> Result<Option<UserRow>> {
        Ok(lock(&self.users)?.get(user).cloned())
    }

    fn compare_and_swap_coins(&self, user: &UserId, expected: i64, new: i64) -> Result<u64> {
        let mut users = lock(&self.users)?;
        match users.get_mut(user) {
            Some(row) if row.coins == Some(expected) => {
                row.coins = Some(new);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn write_coins(&self, user: &UserId, new: i64) -> Result<u64> {
        let mut users = lock(&self.users)?;
        match users.get_mut(user) {
            Some(row) => {
                row.coins = Some(new);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        lock(&self.ledger)?.push(entry);
        Ok(())
    }

    fn ledger_entries(&self, user: &UserId) -> Result<Vec<LedgerEntry>> {
        Ok(lock(&self.ledger)?
            .iter()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect())
    }

    fn ledger_entries_for_ref(&self, ref_type: &str, ref_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(lock(&self.ledger)?
            .iter()
            .filter(|e| e.refers_to(ref_type, ref_id))
            .cloned()
            .collect())
    }

    fn insert_battle(&self, battle: Battle) -> Result<()> {
        let mut battles = lock(&self.battles)?;
        if battles.contains_key(&battle.id) {
            return Err(CoinduelError::Internal(format!(
                "battle {} already exists",
                battle.id
            )));
        }
        battles.insert(battle.id, battle);
        Ok(())
    }

    fn read_battle(&self, id: BattleId) -> Result<Option<Battle>> {
        Ok(lock(&self.battles)?.get(&id).cloned())
    }

    fn mark_running(&self, id: BattleId, acceptor: &UserId, at: DateTime<Utc>) -> Result<u64> {
        let mut battles = lock(&self.battles)?;
        let Some(battle) = battles.get_mut(&id) else {
            return Ok(0);
        };
        let seat_free = battle.opponent_id.as_ref().is_none_or(|o| o == acceptor);
        if battle.status != BattleStatus::Pending || !seat_free {
            return Ok(0);
        }
        battle.status = BattleStatus::Running;
        battle.opponent_id = Some(acceptor.clone());
        battle.accepted_at = Some(at);
        battle.last_event_at = at;
        Ok(1)
    }

    fn write_side_snapshot(
        &self,
        id: BattleId,
        side: Side,
        snapshot: &SideSnapshot,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut battles = lock(&self.battles)?;
        match battles.get_mut(&id) {
            Some(battle) => {
                battle.record_snapshot(side, snapshot, at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn mark_finished(&self, id: BattleId, verdict: &Verdict, at: DateTime<Utc>) -> Result<u64> {
        let mut battles = lock(&self.battles)?;
        let Some(battle) = battles.get_mut(&id) else {
            return Ok(0);
        };
        if battle.status != BattleStatus::Running {
            return Ok(0);
        }
        battle.status = BattleStatus::Finished;
        battle.winner_id.clone_from(&verdict.winner_id);
        battle.result_reason = Some(verdict.result_reason);
        battle.finished_at = Some(at);
        battle.last_event_at = at;
        Ok(1)
    }

    fn list_battles(&self, filter: &BattleFilter) -> Result<Vec<Battle>> {
        let mut found: Vec<Battle> = lock(&self.battles)?
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    fn insert_turn(&self, turn: Turn) -> Result<()> {
        let mut turns = lock(&self.turns)?;
        let key = (turn.battle_id, turn.player_id.clone());
        if turns.contains_key(&key) {
            return Err(CoinduelError::AlreadySubmitted {
                battle_id: turn.battle_id,
                player: turn.player_id,
            });
        }
        turns.insert(key, turn);
        Ok(())
    }

    fn turns_for_battle(&self, id: BattleId) -> Result<Vec<Turn>> {
        let mut found: Vec<Turn> = lock(&self.turns)?
            .values()
            .filter(|t| t.battle_id == id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.turn_index);
        Ok(found)
    }
}
