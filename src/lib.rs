// nfcap2parquet - netflow capture files to hive-partitioned Parquet
//
// The binary wires these together:
// - `coordinator` runs one `watcher` per configured exporter
// - `watcher` records its progress in the exporter's `ledger`
// - `convert` and `demo` back the one-shot subcommands

pub mod convert;
pub mod coordinator;
pub mod demo;
pub mod init;
pub mod ledger;
pub mod watcher;

pub use coordinator::{run, run_with_shutdown, ExporterSummary, RunSummary};
pub use init::init_tracing;
pub use ledger::{Ledger, LedgerError};
pub use watcher::{DirectoryWatcher, FileStage, WatcherError, WatcherStats};
