//! Diagnostic logging
//!
//! Logs go to stderr so stdout carries only command output. The filter
//! comes from `JOBCTL_LOG` (same syntax as `RUST_LOG`); without it only
//! warnings are shown, or debug output for this crate with `--verbose`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "JOBCTL_LOG";

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,jobctl=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}
