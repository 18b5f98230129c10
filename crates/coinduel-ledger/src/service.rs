//! Balance mutation with compare-and-swap plus a single unconditional
//! fallback, and the bounded conflict retry wrapped around it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use coinduel_store::Store;
use coinduel_types::{
    BalanceChange, CoinduelError, DeltaReason, LedgerConfig, LedgerEntry, Result, UserId,
};
use rand::Rng;

/// Owns every write to `coins` and the audit trail behind it.
pub struct LedgerService<S> {
    store: Arc<S>,
    config: LedgerConfig,
}

impl<S> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> LedgerService<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Stored balance, with a missing row or null column read as 0.
    pub fn fetch_balance(&self, user: &UserId) -> Result<i64> {
        Ok(self
            .store
            .read_user(user)?
            .map_or(0, |row| row.balance()))
    }

    /// Apply `delta` to `user`'s balance exactly once.
    ///
    /// # Errors
    /// - `UserNotFound` if no row exists
    /// - `InsufficientFunds` if the result would be negative (nothing written)
    /// - `ConcurrentUpdateConflict` if the fallback write touched no rows
    pub fn apply_delta(
        &self,
        user: &UserId,
        delta: i64,
        reason: &DeltaReason,
    ) -> Result<BalanceChange> {
        let row = self
            .store
            .read_user(user)?
            .ok_or_else(|| CoinduelError::UserNotFound(user.clone()))?;
        let previous = row.balance();
        let next = checked_next(previous, delta)?;

        if self.store.compare_and_swap_coins(user, previous, next)? == 1 {
            tracing::debug!(
                %user,
                previous,
                updated = next,
                delta,
                reason = %reason.reason,
                "Coin balance updated"
            );
            self.record(user, delta, reason, false);
            return Ok(BalanceChange {
                previous,
                updated: next,
            });
        }

        // Someone else moved the balance (or the column is null). Re-read and
        // write once without a guard.
        let actual_previous = self
            .store
            .read_user(user)?
            .ok_or_else(|| CoinduelError::UserNotFound(user.clone()))?
            .balance();
        tracing::warn!(
            %user,
            observed = previous,
            actual = actual_previous,
            delta,
            reason = %reason.reason,
            "Optimistic coin update missed; using unconditional fallback write"
        );
        let actual_next = checked_next(actual_previous, delta)?;

        if self.store.write_coins(user, actual_next)? == 0 {
            return Err(CoinduelError::ConcurrentUpdateConflict {
                previous: actual_previous,
            });
        }

        self.record(user, delta, reason, true);
        Ok(BalanceChange {
            previous: actual_previous,
            updated: actual_next,
        })
    }

    /// [`Self::apply_delta`], retrying `ConcurrentUpdateConflict` up to
    /// `max_attempts` in total with linear backoff plus jitter. Every other
    /// error is returned on first sight.
    pub fn apply_delta_with_retry(
        &self,
        user: &UserId,
        delta: i64,
        reason: &DeltaReason,
    ) -> Result<BalanceChange> {
        let mut attempt = 1;
        loop {
            match self.apply_delta(user, delta, reason) {
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    let pause = self.backoff(attempt);
                    tracing::debug!(
                        %user,
                        attempt,
                        backoff_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying coin update after conflict"
                    );
                    thread::sleep(pause);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Entries for a user, newest first.
    pub fn history(&self, user: &UserId) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.store.ledger_entries(user)?;
        entries.reverse();
        Ok(entries)
    }

    /// Entries recorded against a referenced entity, in insertion order.
    pub fn entries_for_ref(&self, ref_type: &str, ref_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.ledger_entries_for_ref(ref_type, ref_id)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.config.backoff_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.backoff_jitter_ms)
        };
        self.config.backoff(attempt) + Duration::from_millis(jitter)
    }

    /// Best-effort audit append. The balance change is already durable.
    fn record(&self, user: &UserId, delta: i64, reason: &DeltaReason, fallback: bool) {
        let entry = LedgerEntry {
            user_id: user.clone(),
            delta,
            reason: reason.reason.clone(),
            ref_type: reason.ref_type.clone(),
            ref_id: reason.ref_id.clone(),
            fallback,
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.append_ledger_entry(entry) {
            tracing::warn!(
                %user,
                delta,
                reason = %reason.reason,
                error = %err,
                "Ledger entry insert failed; balance change stands"
            );
        }
    }
}

fn checked_next(previous: i64, delta: i64) -> Result<i64> {
    let next = previous
        .checked_add(delta)
        .ok_or_else(|| CoinduelError::Internal(format!("coin overflow: {previous} + {delta}")))?;
    if next < 0 {
        return Err(CoinduelError::InsufficientFunds { previous, delta });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinduel_store::{FaultyStore, MemoryStore};
    use coinduel_types::UserRow;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn no_wait() -> LedgerConfig {
        LedgerConfig {
            max_attempts: 3,
            backoff_base_ms: 0,
            backoff_jitter_ms: 0,
        }
    }

    fn setup(coins: i64) -> (LedgerService<FaultyStore<MemoryStore>>, UserId) {
        let store = Arc::new(FaultyStore::new(MemoryStore::new()));
        let u = user("alice");
        store.insert_user(UserRow::new(u.clone(), coins)).unwrap();
        (LedgerService::new(store, no_wait()), u)
    }

    fn reason() -> DeltaReason {
        DeltaReason::new("x")
    }

    #[test]
    fn debit_within_balance() {
        let (ledger, u) = setup(10);
        let change = ledger.apply_delta(&u, -5, &reason()).unwrap();
        assert_eq!(
            change,
            BalanceChange {
                previous: 10,
                updated: 5
            }
        );
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 5);

        let history = ledger.history(&u).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delta, -5);
        assert!(!history[0].fallback);
    }

    #[test]
    fn overdraft_rejected_without_mutation() {
        let (ledger, u) = setup(3);
        let err = ledger.apply_delta(&u, -5, &reason()).unwrap_err();
        assert!(matches!(
            err,
            CoinduelError::InsufficientFunds {
                previous: 3,
                delta: -5
            }
        ));
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 3);
        assert!(ledger.history(&u).unwrap().is_empty());
        assert_eq!(ledger.store().cas_calls(), 0);
    }

    #[test]
    fn credit_then_debit_restores_balance() {
        let (ledger, u) = setup(42);
        ledger.apply_delta(&u, 17, &reason()).unwrap();
        ledger.apply_delta(&u, -17, &reason()).unwrap();
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 42);
    }

    #[test]
    fn missing_user() {
        let (ledger, _) = setup(0);
        let err = ledger.apply_delta(&user("ghost"), 1, &reason()).unwrap_err();
        assert_eq!(err.code(), "USER_NOT_FOUND");
        assert_eq!(ledger.fetch_balance(&user("ghost")).unwrap(), 0);
    }

    #[test]
    fn null_balance_goes_through_fallback() {
        let (ledger, _) = setup(0);
        let n = user("fresh");
        ledger
            .store()
            .insert_user(UserRow {
                id: n.clone(),
                coins: None,
            })
            .unwrap();
        assert_eq!(ledger.fetch_balance(&n).unwrap(), 0);

        let change = ledger.apply_delta(&n, 25, &reason()).unwrap();
        assert_eq!(
            change,
            BalanceChange {
                previous: 0,
                updated: 25
            }
        );
        assert_eq!(ledger.store().fallback_calls(), 1);
        assert!(ledger.history(&n).unwrap()[0].fallback);
    }

    #[test]
    fn cas_miss_uses_actual_balance() {
        let (ledger, u) = setup(10);
        ledger.store().interleave_write(5);

        let change = ledger.apply_delta(&u, -3, &reason()).unwrap();
        assert_eq!(
            change,
            BalanceChange {
                previous: 15,
                updated: 12
            }
        );
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 12);
    }

    #[test]
    fn fallback_rechecks_funds() {
        let (ledger, u) = setup(10);
        // A concurrent spend drains the balance between read and CAS.
        ledger.store().interleave_write(-8);

        let err = ledger.apply_delta(&u, -5, &reason()).unwrap_err();
        assert!(matches!(
            err,
            CoinduelError::InsufficientFunds { previous: 2, .. }
        ));
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 2);
    }

    #[test]
    fn zero_row_fallback_is_a_conflict() {
        let (ledger, u) = setup(10);
        ledger.store().interleave_write(1);
        ledger.store().drop_fallback_writes(1);

        let err = ledger.apply_delta(&u, -1, &reason()).unwrap_err();
        assert!(matches!(
            err,
            CoinduelError::ConcurrentUpdateConflict { previous: 11 }
        ));
        assert!(err.is_retryable());
        assert!(ledger.history(&u).unwrap().is_empty());
    }

    #[test]
    fn retry_recovers_from_conflict() {
        let (ledger, u) = setup(10);
        ledger.store().interleave_write(1);
        ledger.store().drop_fallback_writes(1);

        let change = ledger.apply_delta_with_retry(&u, -1, &reason()).unwrap();
        assert_eq!(
            change,
            BalanceChange {
                previous: 11,
                updated: 10
            }
        );
        assert_eq!(ledger.store().cas_calls(), 2);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let (ledger, u) = setup(10);
        for _ in 0..3 {
            ledger.store().interleave_write(1);
        }
        ledger.store().drop_fallback_writes(3);

        let err = ledger.apply_delta_with_retry(&u, -1, &reason()).unwrap_err();
        assert_eq!(err.code(), "COIN_UPDATE_CONFLICT");
        assert_eq!(ledger.store().cas_calls(), 3);
    }

    #[test]
    fn insufficient_funds_never_retried() {
        let (ledger, u) = setup(1);
        let err = ledger.apply_delta_with_retry(&u, -5, &reason()).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_COINS");
        assert_eq!(ledger.store().cas_calls(), 0);
    }

    #[test]
    fn audit_failure_does_not_roll_back() {
        let (ledger, u) = setup(10);
        ledger.store().fail_ledger_appends(true);

        let change = ledger.apply_delta(&u, -4, &reason()).unwrap();
        assert_eq!(change.updated, 6);
        assert_eq!(ledger.fetch_balance(&u).unwrap(), 6);
        assert!(ledger.history(&u).unwrap().is_empty());
    }

    #[test]
    fn entries_carry_reference() {
        let (ledger, u) = setup(10);
        let r = DeltaReason::new("battle_stake").with_ref("battle", "b-1");
        ledger.apply_delta(&u, -2, &r).unwrap();

        let entries = ledger.entries_for_ref("battle", "b-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, "battle_stake");
        assert_eq!(entries[0].user_id, u);
    }

    #[test]
    fn history_is_newest_first() {
        let (ledger, u) = setup(10);
        ledger.apply_delta(&u, 1, &reason()).unwrap();
        ledger.apply_delta(&u, 2, &reason()).unwrap();
        let deltas: Vec<i64> = ledger.history(&u).unwrap().iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![2, 1]);
    }
}
