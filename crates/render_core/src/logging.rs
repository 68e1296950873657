//! Logging utilities

pub use log::{debug, error, info, trace, warn};

use crate::config::LoggingConfig;

/// Initialize the logging system with the default filter (`info`).
///
/// `RUST_LOG` takes precedence. Later calls are ignored.
pub fn init() {
    init_with(&LoggingConfig::default());
}

/// Initialize logging, falling back to `config.default_level` when
/// `RUST_LOG` is unset. Returns false if a logger was already installed.
pub fn init_with(config: &LoggingConfig) -> bool {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.default_level.as_str()),
    )
    .format_timestamp_millis()
    .try_init()
    .is_ok()
}
