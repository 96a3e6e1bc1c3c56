//! Per-exporter durable progress record.
//!
//! Lives at `{outputdir}/{exporter}/.nfcap2parquet-ledger.json` and is always
//! replaced atomically (temp file, fsync, rename, directory fsync).
//!
//! Protocol for one capture file:
//! 1. before each Parquet file is renamed into place its final path is
//!    appended to `pending` and the ledger is saved
//! 2. once every batch of the file is written, `commit` advances the
//!    file's offset, clears `pending` and saves
//! 3. the source is deleted or archived, then `forget` drops its entry
//!
//! A crash before 2 leaves `pending` behind; those outputs are deleted on the
//! next start and the file is decoded again from its last committed offset.
//! A crash between 2 and 3 leaves a `complete` entry, so the source is only
//! disposed of, never decoded twice.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LEDGER_FILE_NAME: &str = ".nfcap2parquet-ledger.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Progress through one source capture file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Byte offset just past the last record whose batch was committed
    pub committed_offset: u64,
    /// Every record of the file has been committed
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub rows_committed: u64,
}

/// Outputs renamed into place but not yet committed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub next_sequence: u64,
    /// Keyed by source path relative to the watch directory
    #[serde(default)]
    pub files: BTreeMap<String, FileProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingWrite>,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    state: LedgerState,
}

impl Ledger {
    /// Load the ledger stored in `dir`, or start an empty one.
    pub fn load(dir: &Path) -> Result<Self, LedgerError> {
        let path = dir.join(LEDGER_FILE_NAME);
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LedgerState::default(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn next_sequence(&self) -> u64 {
        self.state.next_sequence
    }

    pub fn progress(&self, source: &str) -> Option<&FileProgress> {
        self.state.files.get(source)
    }

    pub fn committed_offset(&self, source: &str) -> u64 {
        self.progress(source).map_or(0, |p| p.committed_offset)
    }

    pub fn pending(&self) -> Option<&PendingWrite> {
        self.state.pending.as_ref()
    }

    /// Sources whose records are all committed but which were not yet disposed of.
    pub fn complete_sources(&self) -> Vec<String> {
        self.state
            .files
            .iter()
            .filter(|(_, p)| p.complete)
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Durably note that `output` is about to appear for `source`.
    ///
    /// Reserves `sequence` so it is never handed out again, even if the
    /// output is rolled back.
    pub fn record_pending_output(
        &mut self,
        source: &str,
        output: &Path,
        sequence: u64,
    ) -> Result<(), LedgerError> {
        let pending = self.state.pending.get_or_insert_with(|| PendingWrite {
            source: source.to_string(),
            outputs: Vec::new(),
        });
        pending.outputs.push(output.to_path_buf());
        self.state.next_sequence = self.state.next_sequence.max(sequence + 1);
        self.save()
    }

    /// Make the pending outputs of `source` permanent and advance its offset.
    pub fn commit(
        &mut self,
        source: &str,
        offset: u64,
        complete: bool,
        rows: u64,
        next_sequence: u64,
    ) -> Result<(), LedgerError> {
        let progress = self.state.files.entry(source.to_string()).or_default();
        progress.committed_offset = offset;
        progress.complete = complete;
        progress.rows_committed += rows;
        self.state.next_sequence = self.state.next_sequence.max(next_sequence);
        self.state.pending = None;
        self.save()
    }

    /// Drop the pending entry after its outputs were deleted.
    pub fn clear_pending(&mut self) -> Result<(), LedgerError> {
        if self.state.pending.take().is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Remove all trace of `source`.
    pub fn forget(&mut self, source: &str) -> Result<(), LedgerError> {
        if self.state.files.remove(source).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!("{}.tmp", LEDGER_FILE_NAME));
        {
            let mut file = File::create(&tmp).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        sync_dir(dir).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
