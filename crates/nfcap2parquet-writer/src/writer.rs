// Atomic Parquet file emission
//
// Layout: {outputdir}/{exporter}/date={YYYY-MM-DD}/hour={HH}/{flush ts}-{seq:06}.parquet
//
// A file is first written to `.{name}.{uuid}.tmp` next to its final path and
// fsynced. `PreparedFile::commit` renames it into place and fsyncs the
// directory, so a reader never sees a partial file at the final path.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nfcap2parquet_batch::RowBatch;
use nfcap2parquet_core::partition::sanitize_path_segment;
use nfcap2parquet_core::{encode_batch, records_to_batch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WriterError};

const TEMP_SUFFIX: &str = ".tmp";

/// A Parquet file that is now visible at its final path.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
    pub hash: blake3::Hash,
}

/// Encoded and fsynced under a temporary name, not yet renamed.
#[derive(Debug)]
#[must_use = "a prepared file must be committed or aborted"]
pub struct PreparedFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    rows: usize,
    bytes: u64,
    hash: blake3::Hash,
}

impl PreparedFile {
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Rename into place and make the rename durable.
    pub fn commit(self) -> Result<WrittenFile> {
        if let Err(e) = fs::rename(&self.temp_path, &self.final_path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(WriterError::write_failure(format!(
                "failed to rename {} to {}: {}",
                self.temp_path.display(),
                self.final_path.display(),
                e
            )));
        }

        if let Some(dir) = self.final_path.parent() {
            sync_dir(dir).map_err(|e| {
                WriterError::write_failure(format!(
                    "failed to sync directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        debug!(
            path = %self.final_path.display(),
            rows = self.rows,
            bytes = self.bytes,
            hash = %self.hash.to_hex(),
            "parquet file committed"
        );

        Ok(WrittenFile {
            path: self.final_path,
            rows: self.rows,
            bytes: self.bytes,
            hash: self.hash,
        })
    }

    /// Discard the temporary file.
    pub fn abort(self) {
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.temp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

/// Writes row batches below one output root.
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    outputdir: PathBuf,
}

impl ParquetWriter {
    pub fn new(outputdir: impl Into<PathBuf>) -> Result<Self> {
        let outputdir = outputdir.into();
        if outputdir.as_os_str().is_empty() {
            return Err(WriterError::invalid_config(
                "output directory must not be empty".to_string(),
            ));
        }
        if outputdir.exists() && !outputdir.is_dir() {
            return Err(WriterError::invalid_config(format!(
                "output path {} is not a directory",
                outputdir.display()
            )));
        }
        Ok(Self { outputdir })
    }

    pub fn outputdir(&self) -> &Path {
        &self.outputdir
    }

    /// Directory holding everything written for one exporter.
    pub fn exporter_dir(&self, flowsrc: &str) -> PathBuf {
        self.outputdir.join(&*sanitize_path_segment(flowsrc))
    }

    /// Final path for `batch` when flushed at `flushed_at`.
    pub fn target_path(&self, batch: &RowBatch, flushed_at: DateTime<Utc>) -> PathBuf {
        self.exporter_dir(&batch.key.flowsrc)
            .join(batch.key.relative_dir())
            .join(file_name(flushed_at, batch.sequence))
    }

    /// Encode `batch` and write it under a temporary name.
    pub fn prepare(&self, batch: &RowBatch) -> Result<PreparedFile> {
        self.prepare_at(batch, Utc::now())
    }

    pub fn prepare_at(&self, batch: &RowBatch, flushed_at: DateTime<Utc>) -> Result<PreparedFile> {
        // Replaced by something else since startup; waiting will not fix it
        if self.outputdir.is_file() {
            return Err(WriterError::invalid_config(format!(
                "output path {} is not a directory",
                self.outputdir.display()
            )));
        }
        if batch.is_empty() {
            return Err(WriterError::write_failure(format!(
                "refusing to write empty batch for {}",
                batch.key
            )));
        }

        let final_path = self.target_path(batch, flushed_at);
        let dir = final_path.parent().ok_or_else(|| {
            WriterError::invalid_config(format!("no parent for {}", final_path.display()))
        })?;
        fs::create_dir_all(dir).map_err(|e| {
            WriterError::write_failure(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let record_batch = records_to_batch(&batch.records).map_err(|e| {
            WriterError::write_failure(format!("failed to build arrow batch: {}", e))
        })?;
        let metadata = [
            ("nfcap2parquet.flowsrc", batch.key.flowsrc.to_string()),
            ("nfcap2parquet.partition", batch.key.relative_dir()),
            ("nfcap2parquet.sequence", batch.sequence.to_string()),
        ];
        let encoded = encode_batch(&record_batch, &metadata).map_err(|e| {
            WriterError::write_failure(format!("failed to encode parquet: {}", e))
        })?;

        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("batch.parquet");
        let temp_path = dir.join(format!(".{}.{}{}", file_name, Uuid::new_v4(), TEMP_SUFFIX));

        if let Err(e) = write_synced(&temp_path, &encoded.bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(WriterError::write_failure(format!(
                "failed to write {}: {}",
                temp_path.display(),
                e
            )));
        }

        Ok(PreparedFile {
            temp_path,
            final_path,
            rows: encoded.row_count,
            bytes: encoded.bytes.len() as u64,
            hash: encoded.hash,
        })
    }

    /// Prepare and commit in one step.
    pub fn write(&self, batch: &RowBatch) -> Result<WrittenFile> {
        self.prepare(batch)?.commit()
    }
}

/// `{%Y%m%d%H%M%S%6f}-{sequence:06}.parquet`
pub fn file_name(flushed_at: DateTime<Utc>, sequence: u64) -> String {
    format!(
        "{}-{:06}.parquet",
        flushed_at.format("%Y%m%d%H%M%S%6f"),
        sequence
    )
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Whether `path` names a temp file left by an interrupted write.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

/// Delete leftover temp files below `dir`. Returns how many were removed.
///
/// A missing `dir` is not an error.
pub fn remove_stale_temp_files(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            removed += remove_stale_temp_files(&path)?;
        } else if file_type.is_file() && is_temp_file(&path) {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed stale temp file");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was actually deleted.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
