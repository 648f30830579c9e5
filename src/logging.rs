//! Logger setup
//!
//! The library only logs through the `log` facade. Binaries and test
//! harnesses call [`init`] once to route records through `env_logger`;
//! `RUST_LOG` still overrides the configured level.

use crate::config::LoggingConfig;
use env_logger::{Builder, Env};

/// Install `env_logger` with the configured default filter.
///
/// `debug` forces the `debug` level. Returns false when a logger was
/// already installed.
pub fn init(config: &LoggingConfig, debug: bool) -> bool {
    let level = if debug { "debug" } else { config.level.as_str() };
    Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}
