//! Fault-injecting store wrapper. **Test use only.**
//!
//! Wraps a real backend and, on request, makes specific calls fail or
//! interleaves a simulated concurrent writer, so the ledger's fallback path
//! and the engine's best-effort writes can be exercised deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use coinduel_types::{
    Battle, BattleId, CoinduelError, LedgerEntry, Result, Side, SideSnapshot, Turn, UserId,
    UserRow, Verdict,
};

use crate::{BattleFilter, Store};

/// A [`Store`] that misbehaves on demand.
#[derive(Debug, Default)]
pub struct FaultyStore<S> {
    inner: S,
    fail_ledger_appends: AtomicBool,
    fail_snapshots: AtomicBool,
    fail_battle_inserts: AtomicBool,
    /// A competing acceptor that takes the seat just before the next
    /// `mark_running`.
    stolen_accept: Mutex<Option<UserId>>,
    /// Each pending value is added to the row just before the next CAS,
    /// as if another writer got there first.
    interleaved_writes: Mutex<VecDeque<i64>>,
    /// Number of upcoming unconditional writes that report zero rows.
    dropped_fallback_writes: AtomicU32,
    /// Users whose balance writes fail with `StoreUnavailable`.
    unwritable_users: Mutex<HashSet<UserId>>,
    /// Balance writes a user still gets before becoming unwritable.
    write_budgets: Mutex<HashMap<UserId, u32>>,
    cas_calls: AtomicU64,
    fallback_calls: AtomicU64,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_ledger_appends: AtomicBool::new(false),
            fail_snapshots: AtomicBool::new(false),
            fail_battle_inserts: AtomicBool::new(false),
            stolen_accept: Mutex::new(None),
            interleaved_writes: Mutex::new(VecDeque::new()),
            dropped_fallback_writes: AtomicU32::new(0),
            unwritable_users: Mutex::new(HashSet::new()),
            write_budgets: Mutex::new(HashMap::new()),
            cas_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_ledger_appends(&self, on: bool) {
        self.fail_ledger_appends.store(on, Ordering::SeqCst);
    }

    pub fn fail_snapshots(&self, on: bool) {
        self.fail_snapshots.store(on, Ordering::SeqCst);
    }

    pub fn fail_battle_inserts(&self, on: bool) {
        self.fail_battle_inserts.store(on, Ordering::SeqCst);
    }

    /// Let `rival` win the next `Pending → Running` race.
    pub fn steal_next_accept(&self, rival: &UserId) {
        if let Ok(mut slot) = self.stolen_accept.lock() {
            *slot = Some(rival.clone());
        }
    }

    /// Allow `n` more balance writes for `user`, then fail them all.
    pub fn unwritable_after(&self, user: &UserId, n: u32) {
        if let Ok(mut budgets) = self.write_budgets.lock() {
            budgets.insert(user.clone(), n);
        }
    }

    /// Queue a concurrent write of `delta` to land before the next CAS.
    pub fn interleave_write(&self, delta: i64) {
        if let Ok(mut queue) = self.interleaved_writes.lock() {
            queue.push_back(delta);
        }
    }

    /// Make the next `n` unconditional writes affect zero rows.
    pub fn drop_fallback_writes(&self, n: u32) {
        self.dropped_fallback_writes.store(n, Ordering::SeqCst);
    }

    pub fn make_unwritable(&self, user: &UserId) {
        if let Ok(mut set) = self.unwritable_users.lock() {
            set.insert(user.clone());
        }
    }

    pub fn make_writable(&self, user: &UserId) {
        if let Ok(mut set) = self.unwritable_users.lock() {
            set.remove(user);
        }
    }

    pub fn cas_calls(&self) -> u64 {
        self.cas_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> u64 {
        self.fallback_calls.load(Ordering::SeqCst)
    }

    fn check_writable(&self, user: &UserId) -> Result<()> {
        let blocked = self
            .unwritable_users
            .lock()
            .map(|set| set.contains(user))
            .unwrap_or(false)
            || self.spend_write_budget(user);
        if blocked {
            tracing::debug!(%user, "injected balance write failure");
            return Err(CoinduelError::StoreUnavailable(format!(
                "injected write failure for {user}"
            )));
        }
        Ok(())
    }

    /// True once `user`'s write budget is exhausted.
    fn spend_write_budget(&self, user: &UserId) -> bool {
        let Ok(mut budgets) = self.write_budgets.lock() else {
            return false;
        };
        match budgets.get_mut(user) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }

    fn take_interleaved(&self) -> Option<i64> {
        self.interleaved_writes
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
    }
}

impl<S: Store> Store for FaultyStore<S> {
    fn insert_user(&self, row: UserRow) -> Result<()> {
        self.inner.insert_user(row)
    }

    fn read_user(&self, user: &UserId) -> Result<Option<UserRow>> {
        self.inner.read_user(user)
    }

    fn compare_and_swap_coins(&self, user: &UserId, expected: i64, new: i64) -> Result<u64> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable(user)?;
        if let Some(delta) = self.take_interleaved() {
            if let Some(row) = self.inner.read_user(user)? {
                tracing::debug!(%user, delta, "injected concurrent write");
                self.inner.write_coins(user, row.balance() + delta)?;
            }
        }
        self.inner.compare_and_swap_coins(user, expected, new)
    }

    fn write_coins(&self, user: &UserId, new: i64) -> Result<u64> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable(user)?;
        let dropped = self
            .dropped_fallback_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            tracing::debug!(%user, "injected zero-row fallback write");
            return Ok(0);
        }
        self.inner.write_coins(user, new)
    }

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        if self.fail_ledger_appends.load(Ordering::SeqCst) {
            return Err(CoinduelError::StoreUnavailable(
                "injected ledger append failure".into(),
            ));
        }
        self.inner.append_ledger_entry(entry)
    }

    fn ledger_entries(&self, user: &UserId) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger_entries(user)
    }

    fn ledger_entries_for_ref(&self, ref_type: &str, ref_id: &str) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger_entries_for_ref(ref_type, ref_id)
    }

    fn insert_battle(&self, battle: Battle) -> Result<()> {
        if self.fail_battle_inserts.load(Ordering::SeqCst) {
            return Err(CoinduelError::StoreUnavailable(
                "injected battle insert failure".into(),
            ));
        }
        self.inner.insert_battle(battle)
    }

    fn read_battle(&self, id: BattleId) -> Result<Option<Battle>> {
        self.inner.read_battle(id)
    }

    fn mark_running(&self, id: BattleId, acceptor: &UserId, at: DateTime<Utc>) -> Result<u64> {
        let rival = self.stolen_accept.lock().ok().and_then(|mut slot| slot.take());
        if let Some(rival) = rival {
            tracing::debug!(battle = %id, %rival, "injected competing accept");
            self.inner.mark_running(id, &rival, at)?;
        }
        self.inner.mark_running(id, acceptor, at)
    }

    fn write_side_snapshot(
        &self,
        id: BattleId,
        side: Side,
        snapshot: &SideSnapshot,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(CoinduelError::StoreUnavailable(
                "injected snapshot failure".into(),
            ));
        }
        self.inner.write_side_snapshot(id, side, snapshot, at)
    }

    fn mark_finished(&self, id: BattleId, verdict: &Verdict, at: DateTime<Utc>) -> Result<u64> {
        self.inner.mark_finished(id, verdict, at)
    }

    fn list_battles(&self, filter: &BattleFilter) -> Result<Vec<Battle>> {
        self.inner.list_battles(filter)
    }

    fn insert_turn(&self, turn: Turn) -> Result<()> {
        self.inner.insert_turn(turn)
    }

    fn turns_for_battle(&self, id: BattleId) -> Result<Vec<Turn>> {
        self.inner.turns_for_battle(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn interleaved_write_defeats_cas() {
        let store = FaultyStore::new(MemoryStore::new());
        store.insert_user(UserRow::new(user("a"), 10)).unwrap();
        store.interleave_write(5);

        assert_eq!(store.compare_and_swap_coins(&user("a"), 10, 7).unwrap(), 0);
        assert_eq!(store.read_user(&user("a")).unwrap().unwrap().balance(), 15);
        assert_eq!(store.cas_calls(), 1);

        // Queue drained: the next CAS behaves normally.
        assert_eq!(store.compare_and_swap_coins(&user("a"), 15, 7).unwrap(), 1);
    }

    #[test]
    fn dropped_fallback_writes_count_down() {
        let store = FaultyStore::new(MemoryStore::new());
        store.insert_user(UserRow::new(user("a"), 1)).unwrap();
        store.drop_fallback_writes(1);
        assert_eq!(store.write_coins(&user("a"), 9).unwrap(), 0);
        assert_eq!(store.write_coins(&user("a"), 9).unwrap(), 1);
        assert_eq!(store.fallback_calls(), 2);
    }

    #[test]
    fn unwritable_user_fails_until_cleared() {
        let store = FaultyStore::new(MemoryStore::new());
        store.insert_user(UserRow::new(user("a"), 1)).unwrap();
        store.make_unwritable(&user("a"));
        let err = store.write_coins(&user("a"), 2).unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        store.make_writable(&user("a"));
        assert_eq!(store.write_coins(&user("a"), 2).unwrap(), 1);
    }

    #[test]
    fn write_budget_runs_out() {
        let store = FaultyStore::new(MemoryStore::new());
        store.insert_user(UserRow::new(user("a"), 1)).unwrap();
        store.unwritable_after(&user("a"), 1);
        assert_eq!(store.compare_and_swap_coins(&user("a"), 1, 2).unwrap(), 1);
        assert!(store.compare_and_swap_coins(&user("a"), 2, 3).is_err());
        assert!(store.write_coins(&user("a"), 3).is_err());
    }

    #[test]
    fn stolen_accept_takes_the_seat() {
        let store = FaultyStore::new(MemoryStore::new());
        let battle = Battle::pending(
            BattleId::new(),
            user("c"),
            3,
            coinduel_types::BattleSetup::simple(0),
        );
        let id = battle.id;
        store.insert_battle(battle).unwrap();
        store.steal_next_accept(&user("rival"));

        assert_eq!(store.mark_running(id, &user("o"), Utc::now()).unwrap(), 0);
        let stored = store.read_battle(id).unwrap().unwrap();
        assert_eq!(stored.opponent_id, Some(user("rival")));
    }

    #[test]
    fn battle_insert_failure() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_battle_inserts(true);
        let battle = Battle::pending(
            BattleId::new(),
            user("c"),
            3,
            coinduel_types::BattleSetup::simple(0),
        );
        let id = battle.id;
        assert_eq!(
            store.insert_battle(battle).unwrap_err().code(),
            "STORE_UNAVAILABLE"
        );
        assert!(store.read_battle(id).unwrap().is_none());
    }
}
