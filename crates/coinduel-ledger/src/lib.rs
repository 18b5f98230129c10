//! # coinduel-ledger
//!
//! **Ledger plane**: the only component allowed to mutate `coins`.
//!
//! ## Protocol
//!
//! ```text
//! read prev → check prev + delta ≥ 0 → CAS(coins: prev → next)
//!     ├─ 1 row  → append audit entry → done
//!     └─ 0 rows → re-read actual → check again → unconditional write
//!                     ├─ 1 row  → append audit entry (fallback) → done
//!                     └─ 0 rows → ConcurrentUpdateConflict
//! ```
//!
//! The unconditional fallback knowingly accepts a lost-update window when
//! two writers hit it at the same instant, in exchange for liveness when the
//! optimistic path starves. Entries written through it are flagged so the
//! window stays visible to [`LedgerService::audit`].
//!
//! Audit entries are best-effort: a failed append is logged and never rolls
//! back the balance change.

pub mod audit;
pub mod service;

pub use audit::AuditReport;
pub use service::LedgerService;
