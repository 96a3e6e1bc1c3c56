// One-shot conversion of capture files to Parquet
//
// Same partitioning, naming and atomic writes as the watcher, without the
// ledger: sources are left in place and each file either lands completely or
// not at all.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use nfcap2parquet_batch::{BatchAccumulator, BatchConfig, RowBatch, DEFAULT_MAX_ROWS};
use nfcap2parquet_core::capture::CaptureReader;
use nfcap2parquet_core::DecodeError;
use nfcap2parquet_writer::{remove_file_if_exists, ParquetWriter, WrittenFile};
use regex::Regex;
use tracing::{debug, error, info, warn};

/// Capture file names picked up from a source directory
pub const CONVERT_FILE_PATTERN: &str = r"^nfcapd\.\d{12}";

/// Tag used when neither `-f` nor the file header names the exporter
pub const UNKNOWN_FLOWSRC: &str = "unknown-exporter";

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Overrides the ident stored in each file's header
    pub flowsrc: Option<String>,
    pub recursive: bool,
    pub max_rows: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            flowsrc: None,
            recursive: false,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub files_converted: usize,
    pub files_failed: usize,
    pub parquet_files: usize,
    pub rows: u64,
}

impl ConvertSummary {
    pub fn is_success(&self) -> bool {
        self.files_failed == 0
    }
}

/// Convert `source` (a file or a directory of capture files) into `parquetdir`.
pub fn convert_path(
    source: &Path,
    parquetdir: &Path,
    options: &ConvertOptions,
) -> Result<ConvertSummary> {
    let files = if source.is_dir() {
        let pattern = Regex::new(CONVERT_FILE_PATTERN).context("invalid capture file pattern")?;
        let mut files = Vec::new();
        list_files(source, options.recursive, &pattern, &mut files)
            .with_context(|| format!("failed to list {}", source.display()))?;
        files.sort();
        files
    } else {
        vec![source.to_path_buf()]
    };

    if files.is_empty() {
        warn!(source = %source.display(), "no capture files found");
    }

    let writer = ParquetWriter::new(parquetdir)
        .with_context(|| format!("invalid output directory {}", parquetdir.display()))?;

    let mut summary = ConvertSummary::default();
    // Shared across files so two outputs in one partition never collide
    let mut next_sequence = 0u64;
    for file in &files {
        match convert_file(file, &writer, options, &mut next_sequence) {
            Ok(written) => {
                let rows: u64 = written.iter().map(|w| w.rows as u64).sum();
                info!(
                    file = %file.display(),
                    parquet_files = written.len(),
                    rows,
                    "converted"
                );
                summary.files_converted += 1;
                summary.parquet_files += written.len();
                summary.rows += rows;
            }
            Err(e) => {
                error!(file = %file.display(), error = %format!("{:#}", e), "conversion failed");
                summary.files_failed += 1;
            }
        }
    }

    Ok(summary)
}

fn convert_file(
    path: &Path,
    writer: &ParquetWriter,
    options: &ConvertOptions,
    next_sequence: &mut u64,
) -> Result<Vec<WrittenFile>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let provisional: Arc<str> = Arc::from(options.flowsrc.as_deref().unwrap_or(UNKNOWN_FLOWSRC));
    let mut reader = CaptureReader::new(BufReader::new(file), provisional)
        .with_context(|| format!("failed to decode {}", path.display()))?;

    let flowsrc = match (&options.flowsrc, reader.header().ident.is_empty()) {
        (Some(name), _) => name.clone(),
        (None, false) => reader.header().ident.clone(),
        (None, true) => UNKNOWN_FLOWSRC.to_string(),
    };
    debug!(file = %path.display(), flowsrc = %flowsrc, "decoding");

    let tag: Arc<str> = Arc::from(flowsrc.as_str());
    let mut accumulator =
        BatchAccumulator::new(BatchConfig::with_max_rows(options.max_rows), *next_sequence);
    let mut written = Vec::new();

    let result = stream_batches(path, &mut reader, &tag, &mut accumulator, writer, &mut written);
    // Sequences handed out are never reused, even after a failure
    *next_sequence = accumulator.next_sequence();

    if let Err(e) = result {
        for file in &written {
            if let Err(rm) = remove_file_if_exists(&file.path) {
                warn!(path = %file.path.display(), error = %rm, "failed to remove partial output");
            }
        }
        return Err(e);
    }
    Ok(written)
}

/// Writes each batch as soon as the accumulator releases it, so only one
/// batch per open partition is held in memory.
fn stream_batches<R: Read>(
    path: &Path,
    reader: &mut CaptureReader<R>,
    tag: &Arc<str>,
    accumulator: &mut BatchAccumulator,
    writer: &ParquetWriter,
    written: &mut Vec<WrittenFile>,
) -> Result<()> {
    let write = |batch: RowBatch, written: &mut Vec<WrittenFile>| -> Result<()> {
        let file = writer
            .write(&batch)
            .with_context(|| format!("failed to write output for {}", path.display()))?;
        written.push(file);
        Ok(())
    };

    for item in reader.by_ref() {
        match item {
            Ok(mut record) => {
                record.flowsrc = Arc::clone(tag);
                if let Some(batch) = accumulator.add(record) {
                    write(batch, written)?;
                }
            }
            Err(DecodeError::TruncatedRecord { offset, .. }) => {
                warn!(
                    file = %path.display(),
                    offset,
                    "last record truncated, converting complete records only"
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to decode {}", path.display()));
            }
        }
    }

    for batch in accumulator.flush_all() {
        write(batch, written)?;
    }
    Ok(())
}

fn list_files(dir: &Path, recursive: bool, pattern: &Regex, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_file() {
            if pattern.is_match(name) {
                out.push(entry.path());
            }
        } else if file_type.is_dir() && recursive {
            list_files(&entry.path(), recursive, pattern, out)?;
        }
    }
    Ok(())
}
