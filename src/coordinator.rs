// Pipeline coordinator
//
// One tokio task per exporter. Each task alternates between a blocking tick
// (scan, decode, write) on the blocking pool and a poll sleep raced against
// the shutdown token. A watcher that stops only ends its own task.

use std::time::Duration;

use anyhow::{bail, Result};
use nfcap2parquet_config::PipelineConfig;
use nfcap2parquet_core::set_parquet_row_group_size;
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::watcher::{DirectoryWatcher, WatcherError, WatcherStats};

/// Final numbers for one exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterSummary {
    pub exporter: String,
    pub files_consumed: u64,
    pub files_quarantined: u64,
    pub files_written: u64,
    pub rows_written: u64,
    /// Set when the watcher stopped on a fatal error
    pub error: Option<String>,
}

impl ExporterSummary {
    fn new(exporter: String, stats: &WatcherStats, error: Option<String>) -> Self {
        Self {
            exporter,
            files_consumed: stats.files_consumed,
            files_quarantined: stats.files_quarantined,
            files_written: stats.files_written,
            rows_written: stats.rows_written,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub exporters: Vec<ExporterSummary>,
}

impl RunSummary {
    pub fn exporter(&self, name: &str) -> Option<&ExporterSummary> {
        self.exporters.iter().find(|e| e.exporter == name)
    }

    pub fn rows_written(&self) -> u64 {
        self.exporters.iter().map(|e| e.rows_written).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.exporters.iter().any(|e| e.error.is_some())
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight files...");
        },
        _ = terminate => {
            info!("Received SIGTERM, finishing in-flight files...");
        },
    }
}

/// Run until SIGINT or SIGTERM.
pub async fn run(config: PipelineConfig) -> Result<RunSummary> {
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let signals = tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => trigger.cancel(),
            _ = trigger.cancelled() => {}
        }
    });

    let result = run_with_shutdown(config, cancel.clone()).await;
    cancel.cancel();
    let _ = signals.await;
    result
}

/// Run until `cancel` fires or every watcher has stopped.
///
/// Watchers only stop on their own after a fatal error, so returning without
/// `cancel` having fired is an error.
pub async fn run_with_shutdown(
    config: PipelineConfig,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    if let Some(rows) = config.parquet_row_group_size {
        set_parquet_row_group_size(rows);
    }

    let mut summary = RunSummary::default();
    let mut tasks = JoinSet::new();

    for exporter in config.exporters {
        let name = exporter.name.clone();
        let started = tokio::task::spawn_blocking(move || DirectoryWatcher::new(exporter)).await;

        match started {
            Ok(Ok(watcher)) => {
                tasks.spawn(watch_loop(watcher, cancel.clone()));
            }
            Ok(Err(e)) => {
                error!(exporter = %name, error = %e, "exporter failed to start");
                summary.exporters.push(ExporterSummary::new(
                    name,
                    &WatcherStats::default(),
                    Some(e.to_string()),
                ));
            }
            Err(e) => {
                error!(exporter = %name, error = %e, "exporter startup task failed");
                summary.exporters.push(ExporterSummary::new(
                    name,
                    &WatcherStats::default(),
                    Some(e.to_string()),
                ));
            }
        }
    }

    if tasks.is_empty() {
        bail!("no exporter could be started");
    }

    info!(exporters = tasks.len(), "pipeline running");

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(exporter) => summary.exporters.push(exporter),
            Err(e) => error!(error = %e, "exporter task panicked"),
        }
    }

    for exporter in &summary.exporters {
        info!(
            exporter = %exporter.exporter,
            files_consumed = exporter.files_consumed,
            files_quarantined = exporter.files_quarantined,
            files_written = exporter.files_written,
            rows_written = exporter.rows_written,
            failed = exporter.error.is_some(),
            "exporter finished"
        );
    }

    if !cancel.is_cancelled() {
        let failed: Vec<&str> = summary
            .exporters
            .iter()
            .filter(|e| e.error.is_some())
            .map(|e| e.exporter.as_str())
            .collect();
        bail!("every exporter stopped before shutdown (failed: {})", failed.join(", "));
    }

    Ok(summary)
}

async fn watch_loop(mut watcher: DirectoryWatcher, cancel: CancellationToken) -> ExporterSummary {
    let name = watcher.name().to_string();
    let poll_interval = watcher.config().poll_interval;
    let mut failure = None;

    loop {
        // The watcher moves onto the blocking pool; a panic there loses it
        let last_stats = watcher.stats().clone();
        let token = cancel.clone();
        let ticked = tokio::task::spawn_blocking(move || {
            let result = watcher.tick(&token);
            (watcher, result)
        })
        .await;

        let (returned, result) = match ticked {
            Ok(pair) => pair,
            Err(e) => return panicked_summary(name, &last_stats, &e),
        };
        watcher = returned;

        if let Err(e) = result {
            log_stop(&name, &e);
            failure = Some(e.to_string());
            break;
        }

        if !sleep_or_cancel(poll_interval, &cancel).await {
            break;
        }
    }

    info!(exporter = %name, "watcher stopped");
    ExporterSummary::new(name, watcher.stats(), failure)
}

fn panicked_summary(name: String, stats: &WatcherStats, err: &JoinError) -> ExporterSummary {
    error!(exporter = %name, error = %err, "watcher tick panicked");
    ExporterSummary::new(name, stats, Some(format!("watcher panicked: {}", err)))
}

/// Returns false when cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn log_stop(name: &str, err: &WatcherError) {
    match err {
        WatcherError::Fatal { .. } => {
            error!(exporter = %name, error = %err, "watcher stopped on fatal error")
        }
        WatcherError::Ledger { .. } => {
            error!(exporter = %name, error = %err, "watcher stopped, ledger unusable")
        }
    }
}
