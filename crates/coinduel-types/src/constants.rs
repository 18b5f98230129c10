//! System-wide constants for the coinduel ledger and battle engine.

/// Attempts made by `apply_delta_with_retry` before surfacing a conflict.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base backoff between conflict retries, multiplied by the attempt number.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 10;

/// Upper bound of the random jitter added to each backoff.
pub const DEFAULT_BACKOFF_JITTER_MS: u64 = 5;

/// Default `tracing` filter directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// `ref_type` recorded on every battle-related ledger entry.
pub const BATTLE_REF_TYPE: &str = "battle";

/// Escrow debit at create / accept.
pub const REASON_BATTLE_STAKE: &str = "battle_stake";

/// Winner's payout (twice the stake).
pub const REASON_BATTLE_WIN: &str = "battle_win";

/// Each side's stake returned on a tie.
pub const REASON_BATTLE_REFUND: &str = "battle_refund";

/// Escrow returned when a create or accept does not go through.
pub const REASON_BATTLE_STAKE_REFUND: &str = "battle_stake_refund";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "coinduel";
