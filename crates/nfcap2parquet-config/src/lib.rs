// nfcap2parquet-config - Pipeline configuration
//
// One INI file drives the whole process:
// - `[DEFAULT]` holds process-wide settings (logfile, log_level) and
//   per-exporter tunables every section inherits
// - every other section is one exporter; its name becomes the flowsrc tag
//
// Parsing and validation happen once at startup. Everything here is
// immutable afterwards.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

mod error;
mod sections;
mod validation;

pub use error::{ConfigError, Result};
pub use sections::{ExporterSection, PolicyKind, Sections, DEFAULT_SECTION};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_STABLE_SCANS: u32 = 2;
pub const DEFAULT_MAX_BATCH_ROWS: usize = 250_000;
pub const DEFAULT_TRUNCATION_RETRIES: u32 = 5;
pub const DEFAULT_WRITE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WRITE_BACKOFF_MS: u64 = 500;
/// Finished nfcapd rotations only; skips `nfcapd.current.*`
pub const DEFAULT_FILE_PATTERN: &str = r"^nfcapd\.\d{12}$";

/// What happens to a capture file once its records are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePolicy {
    Delete,
    /// Move into `<dir>/<exporter>/`, keeping the path relative to the watchdir
    Archive(PathBuf),
}

impl std::fmt::Display for SourcePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourcePolicy::Delete => write!(f, "delete"),
            SourcePolicy::Archive(dir) => write!(f, "archive ({})", dir.display()),
        }
    }
}

/// Settings for one exporter section
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Section name, used as the flowsrc tag
    pub name: String,
    pub watchdir: PathBuf,
    pub outputdir: PathBuf,
    pub poll_interval: Duration,
    /// Consecutive unchanged scans before a file counts as finished
    pub stable_scans: u32,
    pub max_batch_rows: usize,
    /// Unchanged-and-truncated attempts before quarantine, 0 waits forever
    pub truncation_retries: u32,
    pub source_policy: SourcePolicy,
    pub recursive: bool,
    pub file_pattern: Regex,
    pub write_max_attempts: u32,
    pub write_backoff: Duration,
}

impl ExporterConfig {
    /// Exporter with default tunables.
    pub fn new(
        name: impl Into<String>,
        watchdir: impl Into<PathBuf>,
        outputdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            watchdir: watchdir.into(),
            outputdir: outputdir.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            stable_scans: DEFAULT_STABLE_SCANS,
            max_batch_rows: DEFAULT_MAX_BATCH_ROWS,
            truncation_retries: DEFAULT_TRUNCATION_RETRIES,
            source_policy: SourcePolicy::Delete,
            recursive: false,
            file_pattern: default_file_pattern(),
            write_max_attempts: DEFAULT_WRITE_MAX_ATTEMPTS,
            write_backoff: Duration::from_millis(DEFAULT_WRITE_BACKOFF_MS),
        }
    }

    /// Whether `file_name` is a capture file this exporter should pick up.
    pub fn matches(&self, file_name: &str) -> bool {
        self.file_pattern.is_match(file_name)
    }
}

static DEFAULT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_FILE_PATTERN).expect("Invalid default file pattern"));

fn default_file_pattern() -> Regex {
    DEFAULT_PATTERN.clone()
}

/// Whole-process configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Log to this file instead of the console
    pub logfile: Option<PathBuf>,
    /// tracing EnvFilter directive, e.g. `info` or `nfcap2parquet=debug`
    pub log_level: Option<String>,
    /// Rows per Parquet row group, process wide
    pub parquet_row_group_size: Option<usize>,
    /// Exporters in file order
    pub exporters: Vec<ExporterConfig>,
}

impl PipelineConfig {
    pub fn exporter(&self, name: &str) -> Option<&ExporterConfig> {
        self.exporters.iter().find(|e| e.name == name)
    }
}

/// Load and validate a configuration file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&text)
}

/// Parse and validate configuration text.
pub fn parse_str(text: &str) -> Result<PipelineConfig> {
    let sections = Sections::parse(text)?;
    let config = from_sections(&sections)?;
    validation::validate(&config)?;
    Ok(config)
}

fn from_sections(sections: &Sections) -> Result<PipelineConfig> {
    let logfile = sections
        .default_value("logfile")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let log_level = sections
        .default_value("log_level")
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let parquet_row_group_size = sections
        .default_value("parquet_row_group_size")
        .map(|v| parse_number::<usize>(DEFAULT_SECTION, "parquet_row_group_size", v))
        .transpose()?;

    let exporters = sections
        .exporters()?
        .into_iter()
        .map(|(name, section)| exporter_from_section(name, section))
        .collect::<Result<Vec<_>>>()?;

    Ok(PipelineConfig {
        logfile,
        log_level,
        parquet_row_group_size,
        exporters,
    })
}

fn exporter_from_section(name: &str, section: ExporterSection) -> Result<ExporterConfig> {
    let watchdir = required_path(name, "watchdir", section.watchdir)?;
    let outputdir = required_path(name, "outputdir", section.outputdir)?;
    let mut exporter = ExporterConfig::new(name, watchdir, outputdir);

    if let Some(secs) = section.poll_interval_secs {
        exporter.poll_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = section.write_backoff_ms {
        exporter.write_backoff = Duration::from_millis(ms);
    }
    exporter.stable_scans = section.stable_scans.unwrap_or(exporter.stable_scans);
    exporter.max_batch_rows = section.max_batch_rows.unwrap_or(exporter.max_batch_rows);
    exporter.truncation_retries = section
        .truncation_retries
        .unwrap_or(exporter.truncation_retries);
    exporter.write_max_attempts = section
        .write_max_attempts
        .unwrap_or(exporter.write_max_attempts);
    exporter.recursive = section.recursive.unwrap_or(exporter.recursive);
    if let Some(pattern) = section.file_pattern {
        exporter.file_pattern = pattern;
    }

    exporter.source_policy = match section.source_policy.unwrap_or(PolicyKind::Delete) {
        PolicyKind::Delete => SourcePolicy::Delete,
        PolicyKind::Archive => {
            SourcePolicy::Archive(required_path(name, "archive_dir", section.archive_dir)?)
        }
    };

    Ok(exporter)
}

fn required_path(section: &str, key: &str, value: Option<String>) -> Result<PathBuf> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })?;

    let path = PathBuf::from(&value);
    if !path.is_absolute() {
        return Err(ConfigError::RelativePath {
            section: section.to_string(),
            key: key.to_string(),
            value,
        });
    }
    Ok(path)
}

fn parse_number<T>(section: &str, key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .replace('_', "")
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
