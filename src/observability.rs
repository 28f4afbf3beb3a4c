//! Structured logging setup.
//!
//! The runtime itself only ever emits [`tracing`] events; wiring those up to
//! an actual subscriber is left to the binary that embeds this crate. This
//! module provides the one subscriber configuration the bundled exchange
//! server binary needs: human-readable output in development, JSON lines in
//! production, both filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact, human-readable lines for local development.
    Pretty,
    /// Newline-delimited JSON for ingestion by a log pipeline.
    Json,
}

/// Installs a global [`tracing`] subscriber.
///
/// `default_level` is used to build the env filter when `RUST_LOG` is unset;
/// it should be a valid filter directive such as `"info"` or
/// `"agentex=debug,tower_http=info"`.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
