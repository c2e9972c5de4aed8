//! Subscriber setup.
//!
//! [`init`] installs the process-wide `fmt` subscriber. Audit events go
//! through it like any other event, under the `pigate::audit` target.

use tracing_subscriber::EnvFilter;

use pigate_config::LoggingConfig;

use crate::error::GatewayError;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over everything. Otherwise `-v` raises the level to
/// debug and `-vv` to trace; with no flag the configured level applies.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<(), GatewayError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = match verbosity {
                0 => config.level.as_str(),
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::try_new(directive).map_err(|e| {
                GatewayError::Config(format!("invalid log level {directive:?}: {e}"))
            })?
        }
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        _ => builder.json().try_init(),
    };
    installed.map_err(|e| GatewayError::Config(format!("cannot install subscriber: {e}")))
}
