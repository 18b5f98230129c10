//! Audit drift check.
//!
//! Invariant checked per user:
//! ```text
//! stored coins == opening balance + Σ(ledger deltas)
//! ```
//!
//! It holds unless an audit append failed or two writers collided inside the
//! fallback window. Both are documented, non-fatal outcomes, so a mismatch is
//! reported for reconciliation rather than repaired automatically.

use coinduel_store::Store;
use coinduel_types::{CoinduelError, Result, UserId};

use crate::LedgerService;

/// Stored balance compared against what the audit trail explains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub user: UserId,
    pub opening: i64,
    pub stored: i64,
    pub ledger_net: i64,
    pub entries: usize,
    /// Entries written through the unconditional fallback path.
    pub fallback_entries: usize,
}

impl AuditReport {
    /// Balance the audit trail accounts for.
    #[must_use]
    pub fn expected(&self) -> i64 {
        self.opening + self.ledger_net
    }

    /// Stored minus expected. Positive means unexplained coins.
    #[must_use]
    pub fn drift(&self) -> i64 {
        self.stored - self.expected()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

impl<S: Store> LedgerService<S> {
    /// Compare `user`'s stored balance with `opening + Σ deltas`.
    pub fn audit(&self, user: &UserId, opening: i64) -> Result<AuditReport> {
        let entries = self.store().ledger_entries(user)?;
        let stored = self.fetch_balance(user)?;
        Ok(AuditReport {
            user: user.clone(),
            opening,
            stored,
            ledger_net: entries.iter().map(|e| e.delta).sum(),
            entries: entries.len(),
            fallback_entries: entries.iter().filter(|e| e.fallback).count(),
        })
    }

    /// Like [`Self::audit`] but fails on any drift.
    ///
    /// # Errors
    /// Returns [`CoinduelError::LedgerDrift`] if the balance is unexplained.
    pub fn verify_audit(&self, user: &UserId, opening: i64) -> Result<()> {
        let report = self.audit(user, opening)?;
        if !report.is_consistent() {
            tracing::warn!(
                %user,
                expected = report.expected(),
                stored = report.stored,
                fallback_entries = report.fallback_entries,
                "Ledger drift detected"
            );
            return Err(CoinduelError::LedgerDrift {
                user: user.clone(),
                expected: report.expected(),
                actual: report.stored,
            });
        }
        Ok(())
    }
}
