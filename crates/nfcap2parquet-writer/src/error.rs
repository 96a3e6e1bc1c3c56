//! Error types for the Parquet writer crate

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E004: Configuration missing or invalid
    E004InvalidConfig,
    /// E005: Write operation failed
    E005WriteFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E004InvalidConfig => "E004",
            Self::E005WriteFailure => "E005",
        }
    }
}

/// Errors that can occur while writing Parquet output
#[derive(Debug, Error)]
pub enum WriterError {
    /// Invalid configuration provided
    #[error("[{code}] Invalid configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    /// Write operation failed
    #[error("[{code}] Write operation failed: {message}")]
    WriteFailure { code: &'static str, message: String },
}

impl WriterError {
    /// Create an invalid config error with error code
    pub fn invalid_config(message: String) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E004InvalidConfig.as_str(),
            message,
        }
    }

    /// Create a write failure error with error code
    pub fn write_failure(message: String) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E005WriteFailure.as_str(),
            message,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig { .. } => ErrorCode::E004InvalidConfig,
            Self::WriteFailure { .. } => ErrorCode::E005WriteFailure,
        }
    }

    /// Write failures may succeed on a later attempt; bad configuration won't.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteFailure { .. })
    }
}

/// Result type alias for WriterError
pub type Result<T> = std::result::Result<T, WriterError>;
