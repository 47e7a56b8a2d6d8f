//! Tracing setup for the CLI.
//!
//! Two targets are filtered independently:
//!
//! - `prepare`: the runner's own diagnostics, raised with `-d`.
//! - `actions`: output and protocol messages of running actions, raised
//!   with `-v`.
//!
//! `RUST_LOG` overrides both when set.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 0 = error, 1 = warn, 2 = info, 3 = debug, 4+ = trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Directive string used when `RUST_LOG` is unset.
pub fn default_directives(debug: u8, verbosity: u8) -> String {
    format!(
        "prepare={},actions={}",
        level_for(debug),
        level_for(verbosity)
    )
}

/// Initialize the global subscriber. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=prepare=debug,actions=trace prepare run
/// ```
pub fn init(debug: u8, verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug, verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
