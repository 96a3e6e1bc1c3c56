// Configuration validation
//
// Value-range checks that the parser cannot express. Whether a watchdir
// exists is checked when its watcher starts, so one missing directory only
// takes out its own exporter.

use std::collections::HashMap;

use nfcap2parquet_core::partition::sanitize_path_segment;
use tracing::warn;

use crate::error::{ConfigError, Result};
use crate::{ExporterConfig, PipelineConfig};

pub fn validate(config: &PipelineConfig) -> Result<()> {
    if config.exporters.is_empty() {
        return Err(ConfigError::NoExporters);
    }

    if config.parquet_row_group_size == Some(0) {
        return Err(invalid(
            "DEFAULT",
            "parquet_row_group_size",
            "0",
            "must be greater than 0",
        ));
    }

    for exporter in &config.exporters {
        validate_exporter(exporter)?;
    }

    // Exporters own their output directory exclusively
    let mut owners: HashMap<std::path::PathBuf, &str> = HashMap::new();
    for exporter in &config.exporters {
        let dir = exporter_output_dir(exporter);
        if let Some(first) = owners.insert(dir.clone(), &exporter.name) {
            return Err(ConfigError::ConflictingExporters {
                first: first.to_string(),
                second: exporter.name.clone(),
                dir: dir.display().to_string(),
            });
        }
    }

    Ok(())
}

fn validate_exporter(exporter: &ExporterConfig) -> Result<()> {
    let section = exporter.name.as_str();

    if exporter.poll_interval.is_zero() {
        return Err(invalid(section, "poll_interval_secs", "0", "must be greater than 0"));
    }
    if exporter.stable_scans == 0 {
        return Err(invalid(section, "stable_scans", "0", "must be at least 1"));
    }
    if exporter.max_batch_rows == 0 {
        return Err(invalid(section, "max_batch_rows", "0", "must be greater than 0"));
    }
    if exporter.write_max_attempts == 0 {
        return Err(invalid(section, "write_max_attempts", "0", "must be at least 1"));
    }

    if exporter.max_batch_rows > 10_000_000 {
        warn!(
            exporter = section,
            max_batch_rows = exporter.max_batch_rows,
            "max_batch_rows is very large; may cause memory issues"
        );
    }

    if exporter.truncation_retries == 0 {
        warn!(
            exporter = section,
            "truncation_retries = 0: truncated files are retried forever"
        );
    }

    if exporter.outputdir.starts_with(&exporter.watchdir) {
        warn!(
            exporter = section,
            outputdir = %exporter.outputdir.display(),
            "outputdir is inside watchdir"
        );
    }

    Ok(())
}

fn exporter_output_dir(exporter: &ExporterConfig) -> std::path::PathBuf {
    let segment = sanitize_path_segment(&exporter.name);
    exporter.outputdir.join(&*segment)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_str;

    #[test]
    fn test_no_exporters() {
        let err = parse_str("[DEFAULT]\noutputdir = /out\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoExporters));
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in [
            "poll_interval_secs",
            "stable_scans",
            "max_batch_rows",
            "write_max_attempts",
        ] {
            let text = format!("[r]\nwatchdir = /in\noutputdir = /out\n{} = 0\n", key);
            let err = parse_str(&text).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn test_zero_truncation_retries_allowed() {
        let config =
            parse_str("[r]\nwatchdir = /in\noutputdir = /out\ntruncation_retries = 0\n").unwrap();
        assert_eq!(config.exporters[0].truncation_retries, 0);
    }

    #[test]
    fn test_sanitized_names_must_not_collide() {
        let err = parse_str(
            "[DEFAULT]\noutputdir = /out\n[core/edge]\nwatchdir = /a\n[core edge]\nwatchdir = /b\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingExporters { .. }));
    }
}
