//! Logger initialisation
//!
//! Diagnostics go to stderr through `env_logger`. The default filter is
//! `info`; `RUST_LOG` overrides it.

use env_logger::Env;

pub const DEFAULT_FILTER: &str = "info";

/// Installs the global logger
///
/// Safe to call more than once; later calls leave the first logger in place.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format_timestamp_millis()
        .try_init();
}
