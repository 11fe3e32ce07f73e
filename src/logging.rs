//! Diagnostic logging, powered by tracing-subscriber.
//!
//! Logs go to stderr so they never mix with SQL written to stdout by
//! `flatten`. `RUST_LOG` takes precedence over `--log-level`.

use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG` if set, the given level otherwise.
pub fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG filter '{}': {}", directives, e)),
        _ => EnvFilter::try_new(level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e)),
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = build_env_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .ok();
    Ok(())
}
