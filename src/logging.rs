//! Diagnostic logging for the `oxidized-ash` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job. Logs go to stderr so report output on stdout stays clean.
//!
//! ```bash
//! # Plugin lifecycle and suppression decisions
//! RUST_LOG=oxidized_ash=debug oxidized-ash scan .
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `warn`, or `debug` for our own
/// crate under `--verbose`. Calling it twice is a no-op.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "warn,oxidized_ash=debug"
    } else {
        "warn"
    };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = fmt::layer().with_target(verbose).with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}
