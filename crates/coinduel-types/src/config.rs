//! Configuration types for the coinduel engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoinduelError, Result, constants};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Parse from JSON, filling omitted fields with defaults.
    ///
    /// # Errors
    /// `Serialization` on malformed JSON, `Configuration` if a value is out of
    /// range.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger.validate()
    }
}

/// Conflict-retry policy for balance mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CoinduelError::Configuration(
                "ledger.max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: constants::DEFAULT_BACKOFF_BASE_MS,
            backoff_jitter_ms: constants::DEFAULT_BACKOFF_JITTER_MS,
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: constants::DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.ledger.max_attempts, 3);
        assert_eq!(cfg.telemetry.filter, "info");
        assert!(!cfg.telemetry.json);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"telemetry":{"json":true}}"#).unwrap();
        assert!(cfg.telemetry.json);
        assert_eq!(cfg.telemetry.filter, "info");
        assert_eq!(cfg.ledger, LedgerConfig::default());
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = EngineConfig::from_json_str(r#"{"ledger":{"max_attempts":0}}"#).unwrap_err();
        assert!(matches!(err, CoinduelError::Configuration(_)));
    }

    #[test]
    fn backoff_is_linear() {
        let cfg = LedgerConfig {
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_jitter_ms: 0,
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(10));
        assert_eq!(cfg.backoff(3), Duration::from_millis(30));
    }
}
