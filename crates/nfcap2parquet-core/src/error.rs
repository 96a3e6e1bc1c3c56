//! Error types for capture decoding

use thiserror::Error;

/// Errors produced while decoding a capture file.
///
/// `TruncatedRecord` is the only recoverable variant: every record before
/// `offset` was complete, and decoding may resume from `offset` once the
/// exporter has finished writing.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Magic, version or flags not recognised
    #[error("corrupt capture header: {reason}")]
    CorruptHeader { reason: String },

    /// Stream ended in the middle of a record
    #[error("truncated record at offset {offset} ({available} of {needed} bytes available)")]
    TruncatedRecord {
        offset: u64,
        available: usize,
        needed: usize,
    },

    /// Record header declares an impossible layout
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("failed to read capture file: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Whether the file should be moved aside rather than retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecodeError::CorruptHeader { .. } | DecodeError::CorruptRecord { .. }
        )
    }
}
