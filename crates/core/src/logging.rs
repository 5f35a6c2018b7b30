//! Logging and observability
//!
//! Structured logging via `tracing`, configured the way the CLI surface needs it:
//! an explicit `--log-level` flag takes precedence over `RUST_LOG`, which in turn
//! takes precedence over the `info` default (`spec.md` §6 "Global flags").

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// `level` is the CLI's `--log-level` override, if given; `None` falls back to
/// `RUST_LOG`, then to `info`. `quiet` forces the `warn` level regardless of either,
/// matching the CLI's `--quiet` flag.
pub fn init(level: Option<&str>, quiet: bool) -> anyhow::Result<()> {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else if let Some(level) = level {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!("Logging initialized");
    Ok(())
}
