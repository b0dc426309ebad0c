//! Logging setup.
//!
//! Everything in the crate logs through the [`prelude`] macros. The
//! binary installs a subscriber once at startup with [`init`]; library
//! code never touches global logging state.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod prelude {
    pub use tracing::{Instrument, debug, error, info, info_span, trace, warn};
}

const DEFAULT_FILTER: &str = "minerscan=info";

/// Install the process-wide subscriber.
///
/// Logs go to journald when the process was started by systemd with its
/// output attached to the journal, otherwise to stdout. The filter comes
/// from `RUST_LOG`, falling back to `minerscan=info`.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable, logging to stdout: {e}");
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
