// Logging setup
//
// Console by default, or a single log file shared by every exporter when
// `logfile` is configured. The filter comes from, in order: the command
// line, RUST_LOG, the config file, then `info`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Pick the filter directive to use.
pub fn resolve_filter(cli: Option<&str>, env: Option<&str>, config: Option<&str>) -> EnvFilter {
    [cli, env, config]
        .into_iter()
        .flatten()
        .filter(|d| !d.trim().is_empty())
        .find_map(|d| match EnvFilter::try_new(d) {
            Ok(filter) => Some(filter),
            Err(e) => {
                eprintln!("WARN: ignoring invalid log filter '{}': {}", d, e);
                None
            }
        })
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize tracing. Calling it again is a no-op.
pub fn init_tracing(
    cli_directive: Option<&str>,
    config_directive: Option<&str>,
    logfile: Option<&Path>,
) -> Result<()> {
    let env = std::env::var("RUST_LOG").ok();
    let env_filter = resolve_filter(cli_directive, env.as_deref(), config_directive);
    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore error if a subscriber is already set
    let _ = match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(false),
                ),
            )
        }
        None => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        let filter = resolve_filter(Some("debug"), Some("warn"), Some("error"));
        assert_eq!(filter.to_string(), "debug");

        let filter = resolve_filter(None, Some("warn"), Some("error"));
        assert_eq!(filter.to_string(), "warn");

        let filter = resolve_filter(None, None, Some("nfcap2parquet=trace"));
        assert_eq!(filter.to_string(), "nfcap2parquet=trace");

        let filter = resolve_filter(None, Some(""), None);
        assert_eq!(filter.to_string(), "info");
    }
}
