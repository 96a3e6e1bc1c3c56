use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("key/value pairs before the first section header")]
    KeysOutsideSection,

    #[error("section [{name}] defined twice")]
    DuplicateSection { name: String },

    #[error("key '{key}' defined twice in section [{section}]")]
    DuplicateKey { section: String, key: String },

    /// A key is unknown or its value does not parse
    #[error("[{section}]: {message}")]
    InvalidSection { section: String, message: String },

    #[error("[{section}]: required key '{key}' is missing")]
    MissingKey { section: String, key: String },

    #[error("[{section}]: '{key}' must be an absolute path, got '{value}'")]
    RelativePath {
        section: String,
        key: String,
        value: String,
    },

    #[error("[{section}]: invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("exporters [{first}] and [{second}] map to the same output directory '{dir}'")]
    ConflictingExporters {
        first: String,
        second: String,
        dir: String,
    },

    #[error("no exporter sections configured")]
    NoExporters,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
