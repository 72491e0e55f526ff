//! Tracing setup for programs that embed casebench.
//!
//! The library only emits `tracing` events; whoever owns `main` decides where
//! they go. [`init_tracing`] is the stock choice: an `EnvFilter` honouring
//! `RUST_LOG` plus human or JSON-lines output. Repeated calls are no-ops.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting JSON output for [`init_tracing_from_env`].
pub const LOG_FORMAT_ENV: &str = "CASEBENCH_LOG_FORMAT";

/// Install the global subscriber.
///
/// `level` applies when `RUST_LOG` is unset. With `json` each event is one
/// JSON object per line, which keeps the `event` field of
/// [`obs`](crate::obs) emissions machine-readable.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// [`init_tracing`] with the format taken from `CASEBENCH_LOG_FORMAT`
/// (`json` or anything else for plain text).
pub fn init_tracing_from_env(level: Level) {
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    init_tracing(json, level);
}
