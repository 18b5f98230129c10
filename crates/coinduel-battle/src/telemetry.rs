//! Tracing subscriber setup.

use coinduel_types::{CoinduelError, Result, TelemetryConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins over `config.filter`.
///
/// Calling this again after a subscriber is installed is a no-op.
///
/// # Errors
/// `Configuration` if `config.filter` is not a valid directive.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            CoinduelError::Configuration(format!("invalid log filter {:?}: {e}", config.filter))
        })?,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(config.json.then(|| fmt::layer().json().with_target(true)))
        .with((!config.json).then(|| fmt::layer().with_target(true)))
        .try_init();

    if installed.is_ok() {
        tracing::info!(
            engine = coinduel_types::constants::ENGINE_NAME,
            version = coinduel_types::constants::VERSION,
            json = config.json,
            "Telemetry initialised"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_noop() {
        let config = TelemetryConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
    }

    #[test]
    fn bad_filter_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig {
            filter: "coinduel=loud".into(),
            json: false,
        };
        assert!(matches!(
            init(&config).unwrap_err(),
            CoinduelError::Configuration(_)
        ));
    }
}
