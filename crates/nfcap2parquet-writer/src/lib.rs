//! Hive-partitioned Parquet output for flow record batches.
//!
//! Writes are two-phase so callers can record the final path durably before
//! the file becomes visible: [`ParquetWriter::prepare`] encodes to a fsynced
//! temp file, [`PreparedFile::commit`] renames it into place.

mod error;
mod retry;
mod writer;

pub use error::{ErrorCode, Result, WriterError};
pub use retry::RetryPolicy;
pub use writer::{
    file_name, is_temp_file, remove_file_if_exists, remove_stale_temp_files, ParquetWriter,
    PreparedFile, WrittenFile,
};

pub use nfcap2parquet_core;
