//! Directory watcher: one per exporter.
//!
//! Each [`DirectoryWatcher::tick`] scans the watch directory, promotes files
//! whose size and mtime held still long enough, and then processes the
//! stable files one at a time in file name order:
//!
//! decode from the committed offset → accumulate per partition → write each
//! batch (write-ahead in the ledger) → commit → delete or archive the source.
//!
//! Everything here is blocking; the coordinator runs ticks on tokio's
//! blocking pool.

mod state;

pub use state::{FileStage, WatchState};

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use nfcap2parquet_batch::{BatchAccumulator, BatchConfig, RowBatch};
use nfcap2parquet_config::{ExporterConfig, SourcePolicy};
use nfcap2parquet_core::partition::sanitize_path_segment;
use nfcap2parquet_core::{CaptureReader, DecodeError};
use nfcap2parquet_writer::{
    remove_file_if_exists, remove_stale_temp_files, ParquetWriter, RetryPolicy, WriterError,
};
use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, LedgerError};

/// Directory below the watchdir that receives undecodable files
pub const QUARANTINE_DIR: &str = ".quarantine";

#[derive(Debug, Error)]
pub enum WatcherError {
    /// The exporter cannot continue; siblings are unaffected
    #[error("exporter '{exporter}' stopped: {reason}")]
    Fatal { exporter: String, reason: String },

    #[error("exporter '{exporter}' ledger failure: {source}")]
    Ledger {
        exporter: String,
        #[source]
        source: LedgerError,
    },
}

/// Exporter-level phase, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Processing,
}

/// Running totals for one exporter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub files_consumed: u64,
    pub files_quarantined: u64,
    pub files_written: u64,
    pub rows_written: u64,
}

/// Why writing a file's batches failed. Ledger errors and retryable writer
/// errors are retried.
#[derive(Debug, Error)]
enum EmitError {
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of decoding and writing one source file
enum Outcome {
    Complete { rows: u64 },
    Truncated { rows: u64, file_len: u64 },
    Corrupt(DecodeError),
    /// Reading failed part way; nothing from this attempt was kept
    Unreadable(DecodeError),
}

pub struct DirectoryWatcher {
    config: ExporterConfig,
    flowsrc: Arc<str>,
    writer: ParquetWriter,
    exporter_dir: PathBuf,
    ledger: Ledger,
    accumulator: BatchAccumulator,
    retry: RetryPolicy,
    files: BTreeMap<PathBuf, WatchState>,
    phase: Phase,
    stats: WatcherStats,
}

impl DirectoryWatcher {
    /// Open the exporter's output tree and ledger, then recover from any
    /// interrupted run.
    pub fn new(config: ExporterConfig) -> Result<Self, WatcherError> {
        let exporter = config.name.clone();
        let fatal = |reason: String| WatcherError::Fatal {
            exporter: exporter.clone(),
            reason,
        };

        match fs::metadata(&config.watchdir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(fatal(format!(
                    "watchdir {} is not a directory",
                    config.watchdir.display()
                )))
            }
            Err(e) => {
                return Err(fatal(format!(
                    "watchdir {} is not accessible: {}",
                    config.watchdir.display(),
                    e
                )))
            }
        }

        let writer = ParquetWriter::new(&config.outputdir).map_err(|e| fatal(e.to_string()))?;
        let exporter_dir = writer.exporter_dir(&config.name);
        fs::create_dir_all(&exporter_dir).map_err(|e| {
            fatal(format!(
                "cannot create output directory {}: {}",
                exporter_dir.display(),
                e
            ))
        })?;

        let ledger = Ledger::load(&exporter_dir).map_err(|source| WatcherError::Ledger {
            exporter: exporter.clone(),
            source,
        })?;
        let accumulator = BatchAccumulator::new(
            BatchConfig::with_max_rows(config.max_batch_rows),
            ledger.next_sequence(),
        );
        let retry = RetryPolicy::new(config.write_max_attempts, config.write_backoff);

        let mut watcher = Self {
            flowsrc: Arc::from(config.name.as_str()),
            config,
            writer,
            exporter_dir,
            ledger,
            accumulator,
            retry,
            files: BTreeMap::new(),
            phase: Phase::Idle,
            stats: WatcherStats::default(),
        };
        watcher.recover()?;

        info!(
            exporter = %watcher.config.name,
            watchdir = %watcher.config.watchdir.display(),
            outputdir = %watcher.exporter_dir.display(),
            recursive = watcher.config.recursive,
            source_policy = %watcher.config.source_policy,
            "watching directory"
        );
        Ok(watcher)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Current watch state of `path`, if it is being tracked.
    pub fn file_state(&self, path: &Path) -> Option<&WatchState> {
        self.files.get(path)
    }

    /// Undo whatever an interrupted run left behind.
    fn recover(&mut self) -> Result<(), WatcherError> {
        if let Some(pending) = self.ledger.pending().cloned() {
            warn!(
                exporter = %self.config.name,
                file = %pending.source,
                outputs = pending.outputs.len(),
                "rolling back uncommitted outputs from previous run"
            );
            self.rollback_outputs(&pending.outputs)?;
            self.ledger.clear_pending().map_err(|e| self.ledger_error(e))?;
        }

        match remove_stale_temp_files(&self.exporter_dir) {
            Ok(0) => {}
            Ok(removed) => info!(exporter = %self.config.name, removed, "removed stale temp files"),
            Err(e) => warn!(exporter = %self.config.name, error = %e, "failed to clean temp files"),
        }

        // Committed but not disposed of before the last shutdown
        for source in self.ledger.complete_sources() {
            let path = self.config.watchdir.join(&source);
            if path.exists() {
                info!(exporter = %self.config.name, file = %source, "disposing of already committed file");
                if let Err(e) = self.dispose_source(&path) {
                    warn!(exporter = %self.config.name, file = %source, error = %e, "failed to dispose of source");
                    continue;
                }
            }
            self.ledger.forget(&source).map_err(|e| self.ledger_error(e))?;
        }

        Ok(())
    }

    /// One scan followed by processing every ready file.
    ///
    /// Cancellation is only checked between files.
    pub fn tick(&mut self, cancel: &CancellationToken) -> Result<(), WatcherError> {
        self.phase = Phase::Scanning;
        self.scan()?;

        self.phase = Phase::Processing;
        let now = Instant::now();
        let mut ready: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, state)| state.is_ready(now))
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));

        for path in ready {
            if cancel.is_cancelled() {
                debug!(exporter = %self.config.name, "cancelled between files");
                break;
            }
            let result = self.process(&path);
            if result.is_err() {
                self.phase = Phase::Idle;
                return result;
            }
        }

        self.phase = Phase::Idle;
        Ok(())
    }

    fn scan(&mut self) -> Result<(), WatcherError> {
        let mut found = Vec::new();
        list_candidates(
            &self.config.watchdir,
            self.config.recursive,
            &|name: &str| self.config.matches(name),
            &mut found,
        )
        .map_err(|e| WatcherError::Fatal {
            exporter: self.config.name.clone(),
            reason: format!(
                "cannot list watchdir {}: {}",
                self.config.watchdir.display(),
                e
            ),
        })?;

        let mut seen = HashSet::with_capacity(found.len());
        for (path, size, mtime) in found {
            seen.insert(path.clone());
            match self.files.get_mut(&path) {
                Some(state) => {
                    if state.observe(size, mtime, self.config.stable_scans) {
                        debug!(exporter = %self.config.name, file = %path.display(), size, "file stable");
                    }
                }
                None => {
                    debug!(exporter = %self.config.name, file = %path.display(), size, "file detected");
                    self.files.insert(path, WatchState::new(size, mtime));
                }
            }
        }

        self.files.retain(|path, _| seen.contains(path));
        self.forget_vanished()
    }

    /// Drop ledger entries for sources that no longer exist.
    ///
    /// A truncated file removed before it completed would otherwise stay in
    /// the ledger for good.
    fn forget_vanished(&mut self) -> Result<(), WatcherError> {
        let vanished: Vec<String> = self
            .ledger
            .state()
            .files
            .keys()
            .filter(|source| {
                let path = self.config.watchdir.join(source.as_str());
                matches!(fs::symlink_metadata(&path), Err(e) if e.kind() == io::ErrorKind::NotFound)
            })
            .cloned()
            .collect();

        for source in vanished {
            debug!(exporter = %self.config.name, file = %source, "source vanished, forgetting progress");
            self.ledger.forget(&source).map_err(|e| self.ledger_error(e))?;
        }
        Ok(())
    }

    fn process(&mut self, path: &Path) -> Result<(), WatcherError> {
        let source = self.source_key(path);

        // Committed on an earlier attempt, only disposal is left
        if self.ledger.progress(&source).is_some_and(|p| p.complete) {
            self.finish_source(path, &source)?;
            return Ok(());
        }

        if let Some(state) = self.files.get_mut(path) {
            state.stage = FileStage::Decoding;
        }

        let offset = self.ledger.committed_offset(&source);
        let (input, file_len) = match open_capture(path) {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(exporter = %self.config.name, file = %source, "file vanished before decoding");
                self.files.remove(path);
                return Ok(());
            }
            Err(e) => {
                warn!(exporter = %self.config.name, file = %source, error = %e, "failed to read capture file");
                self.back_to_detected(path);
                return Ok(());
            }
        };

        match self.decode_and_write(&source, input, offset, file_len) {
            Ok(Outcome::Complete { rows }) => {
                info!(exporter = %self.config.name, file = %source, rows, "capture file converted");
                if let Some(state) = self.files.get_mut(path) {
                    state.stage = FileStage::Flushed;
                }
                self.stats.files_consumed += 1;
                counter!("nfcap2parquet.files.consumed", "exporter" => self.config.name.clone())
                    .increment(1);
                self.finish_source(path, &source)
            }
            Ok(Outcome::Truncated { rows, file_len }) => {
                self.handle_truncation(path, &source, rows, file_len);
                Ok(())
            }
            Ok(Outcome::Corrupt(err)) => {
                self.quarantine(path, &source, &err.to_string());
                Ok(())
            }
            Ok(Outcome::Unreadable(err)) => {
                warn!(exporter = %self.config.name, file = %source, error = %err, "failed to read capture file");
                self.back_to_detected(path);
                Ok(())
            }
            Err(err) => self.handle_write_failure(path, &source, err),
        }
    }

    /// Stream records into the accumulator and write every batch.
    ///
    /// On a decode or read error all batches written for this attempt are
    /// rolled back. On a write error the caller rolls back.
    fn decode_and_write(
        &mut self,
        source: &str,
        input: BufReader<File>,
        offset: u64,
        file_len: u64,
    ) -> Result<Outcome, EmitError> {
        let mut reader = match CaptureReader::resume(input, Arc::clone(&self.flowsrc), offset) {
            Ok(reader) => reader,
            Err(e) => return Ok(failed_decode(e)),
        };

        let mut rows = 0u64;
        let mut truncated = false;
        let mut failed = None;

        for item in reader.by_ref() {
            match item {
                Ok(record) => {
                    if let Some(batch) = self.accumulator.add(record) {
                        rows += self.write_batch(source, batch)?;
                    }
                }
                Err(DecodeError::TruncatedRecord { offset, .. }) => {
                    debug!(exporter = %self.config.name, file = %source, offset, "truncated record");
                    truncated = true;
                }
                Err(e) => failed = Some(e),
            }
        }

        if let Some(err) = failed {
            self.rollback_attempt().map_err(EmitError::Ledger)?;
            return Ok(failed_decode(err));
        }

        for batch in self.accumulator.flush_all() {
            rows += self.write_batch(source, batch)?;
        }

        self.ledger.commit(
            source,
            reader.offset(),
            !truncated,
            rows,
            self.accumulator.next_sequence(),
        )?;
        self.stats.rows_written += rows;
        counter!("nfcap2parquet.rows.written", "exporter" => self.config.name.clone())
            .increment(rows);

        if truncated {
            Ok(Outcome::Truncated { rows, file_len })
        } else {
            Ok(Outcome::Complete { rows })
        }
    }

    fn write_batch(&mut self, source: &str, batch: RowBatch) -> Result<u64, EmitError> {
        let prepared = self.writer.prepare(&batch)?;
        if let Err(e) =
            self.ledger
                .record_pending_output(source, prepared.final_path(), batch.sequence)
        {
            prepared.abort();
            return Err(e.into());
        }

        let written = prepared.commit()?;
        info!(
            exporter = %self.config.name,
            file = %source,
            partition = %batch.key.relative_dir(),
            path = %written.path.display(),
            rows = written.rows,
            bytes = written.bytes,
            hash = %written.hash.to_hex(),
            "wrote parquet file"
        );
        self.stats.files_written += 1;
        counter!("nfcap2parquet.parquet.files_written", "exporter" => self.config.name.clone())
            .increment(1);
        Ok(written.rows as u64)
    }

    /// Delete this attempt's outputs and reset the accumulator.
    fn rollback_attempt(&mut self) -> Result<(), LedgerError> {
        let dropped = self.accumulator.reset(self.ledger.next_sequence());
        let outputs = self
            .ledger
            .pending()
            .map(|p| p.outputs.clone())
            .unwrap_or_default();

        for output in &outputs {
            if let Err(e) = remove_file_if_exists(output) {
                return Err(LedgerError::Io {
                    path: output.clone(),
                    source: e,
                });
            }
        }
        if !outputs.is_empty() || dropped > 0 {
            debug!(
                exporter = %self.config.name,
                outputs = outputs.len(),
                buffered_rows = dropped,
                "rolled back attempt"
            );
        }
        self.ledger.clear_pending()
    }

    fn rollback_outputs(&self, outputs: &[PathBuf]) -> Result<(), WatcherError> {
        for output in outputs {
            remove_file_if_exists(output).map_err(|e| WatcherError::Fatal {
                exporter: self.config.name.clone(),
                reason: format!("cannot roll back {}: {}", output.display(), e),
            })?;
        }
        Ok(())
    }

    fn handle_write_failure(
        &mut self,
        path: &Path,
        source: &str,
        err: EmitError,
    ) -> Result<(), WatcherError> {
        if let Err(rollback) = self.rollback_attempt() {
            return Err(WatcherError::Fatal {
                exporter: self.config.name.clone(),
                reason: format!("write failed ({}) and rollback failed ({})", err, rollback),
            });
        }

        counter!("nfcap2parquet.write.failures", "exporter" => self.config.name.clone())
            .increment(1);

        if let EmitError::Writer(writer_err) = &err {
            if !writer_err.is_retryable() {
                error!(
                    exporter = %self.config.name,
                    file = %source,
                    error = %err,
                    "write failed and cannot succeed on retry"
                );
                return Err(WatcherError::Fatal {
                    exporter: self.config.name.clone(),
                    reason: format!("writing {} failed: {}", source, writer_err),
                });
            }
        }

        let Some(state) = self.files.get_mut(path) else {
            return Ok(());
        };
        let failures = state.write_attempts + 1;
        if !self.retry.should_retry(failures) {
            error!(
                exporter = %self.config.name,
                file = %source,
                attempts = failures,
                error = %err,
                "giving up after repeated write failures"
            );
            return Err(WatcherError::Fatal {
                exporter: self.config.name.clone(),
                reason: format!(
                    "writing {} failed {} times, last error: {}",
                    source, failures, err
                ),
            });
        }

        let delay = self.retry.delay_for(failures);
        state.record_write_failure(Instant::now() + delay);
        warn!(
            exporter = %self.config.name,
            file = %source,
            attempt = failures,
            max_attempts = self.retry.max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "write failed, will retry"
        );
        Ok(())
    }

    fn handle_truncation(&mut self, path: &Path, source: &str, rows: u64, file_len: u64) {
        let limit = self.config.truncation_retries;
        let Some(state) = self.files.get_mut(path) else {
            return;
        };
        let attempts = state.record_truncation(file_len);

        if limit > 0 && attempts >= limit {
            let reason = format!(
                "still truncated at offset {} after {} attempts",
                self.ledger.committed_offset(source),
                attempts
            );
            self.quarantine(path, source, &reason);
            return;
        }

        info!(
            exporter = %self.config.name,
            file = %source,
            rows,
            attempts,
            committed_offset = self.ledger.committed_offset(source),
            "file truncated, flushed complete records and will retry"
        );
    }

    fn back_to_detected(&mut self, path: &Path) {
        if let Some(state) = self.files.get_mut(path) {
            state.stage = FileStage::Detected;
            state.stable_scans = 0;
        }
    }

    /// Dispose of a fully committed source and forget it.
    fn finish_source(&mut self, path: &Path, source: &str) -> Result<(), WatcherError> {
        if let Err(e) = self.dispose_source(path) {
            // Ledger still says complete; disposal is retried next time round
            warn!(exporter = %self.config.name, file = %source, error = %e, "failed to dispose of source");
            self.files.remove(path);
            return Ok(());
        }
        self.ledger.forget(source).map_err(|e| self.ledger_error(e))?;
        self.files.remove(path);
        Ok(())
    }

    fn dispose_source(&self, path: &Path) -> io::Result<()> {
        match &self.config.source_policy {
            SourcePolicy::Delete => {
                remove_file_if_exists(path)?;
                debug!(exporter = %self.config.name, file = %path.display(), "deleted source");
            }
            SourcePolicy::Archive(dir) => {
                let target = dir
                    .join(&*sanitize_path_segment(&self.config.name))
                    .join(self.relative_path(path));
                move_file(path, &target)?;
                debug!(
                    exporter = %self.config.name,
                    file = %path.display(),
                    archive = %target.display(),
                    "archived source"
                );
            }
        }
        Ok(())
    }

    fn quarantine(&mut self, path: &Path, source: &str, reason: &str) {
        let target = unique_path(
            &self
                .config
                .watchdir
                .join(QUARANTINE_DIR)
                .join(self.relative_path(path)),
        );

        match move_file(path, &target) {
            Ok(()) => {
                error!(
                    exporter = %self.config.name,
                    file = %source,
                    quarantine = %target.display(),
                    reason,
                    "capture file quarantined"
                );
                self.files.remove(path);
            }
            Err(e) => {
                error!(
                    exporter = %self.config.name,
                    file = %source,
                    reason,
                    move_error = %e,
                    "capture file unusable and could not be moved; ignoring it"
                );
                if let Some(state) = self.files.get_mut(path) {
                    state.stage = FileStage::Quarantined;
                }
            }
        }

        self.stats.files_quarantined += 1;
        counter!("nfcap2parquet.files.quarantined", "exporter" => self.config.name.clone())
            .increment(1);
        if let Err(e) = self.ledger.forget(source) {
            warn!(exporter = %self.config.name, file = %source, error = %e, "failed to update ledger");
        }
    }

    fn relative_path<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.config.watchdir).unwrap_or(path)
    }

    fn source_key(&self, path: &Path) -> String {
        self.relative_path(path).to_string_lossy().into_owned()
    }

    fn ledger_error(&self, source: LedgerError) -> WatcherError {
        WatcherError::Ledger {
            exporter: self.config.name.clone(),
            source,
        }
    }
}

fn open_capture(path: &Path) -> io::Result<(BufReader<File>, u64)> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok((BufReader::new(file), len))
}

fn failed_decode(err: DecodeError) -> Outcome {
    if err.is_terminal() {
        Outcome::Corrupt(err)
    } else {
        Outcome::Unreadable(err)
    }
}

/// Collect `(path, size, mtime)` for matching regular files.
///
/// Dot-entries are skipped. Unreadable subdirectories are logged and skipped;
/// only a failure to list `dir` itself is an error.
fn list_candidates(
    dir: &Path,
    recursive: bool,
    matches: &dyn Fn(&str) -> bool,
    out: &mut Vec<(PathBuf, u64, SystemTime)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            // Rotated away between listing and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if meta.is_dir() {
            if recursive {
                if let Err(e) = list_candidates(&path, recursive, matches, out) {
                    warn!(dir = %path.display(), error = %e, "skipping unreadable directory");
                }
            }
        } else if meta.is_file() && matches(name) {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, meta.len(), mtime));
        }
    }
    Ok(())
}

/// Rename, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// `path`, or `path.1`, `path.2`, ... if it already exists.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let mut n = 1u32;
    loop {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(format!(".{}", n));
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
