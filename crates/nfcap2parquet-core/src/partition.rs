//! Partition key resolution for hive-style output
//!
//! Records are grouped by exporter and by the UTC hour their flow started in:
//! `{flowsrc}/date={YYYY-MM-DD}/hour={HH}`

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::record::FlowRecord;

/// Grouping key of one output partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub flowsrc: Arc<str>,
    pub date: NaiveDate,
    pub hour: u8,
}

impl PartitionKey {
    /// Key for a millisecond timestamp, floored to the hour (UTC).
    ///
    /// Timestamps past chrono's range land in its last hour, see [`clamp_timestamp_ms`].
    pub fn from_millis(flowsrc: Arc<str>, timestamp_ms: u64) -> Self {
        let dt = DateTime::from_timestamp_millis(clamp_timestamp_ms(timestamp_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            flowsrc,
            date: dt.date_naive(),
            hour: dt.hour() as u8,
        }
    }

    /// Hive directory below the exporter directory: `date=YYYY-MM-DD/hour=HH`
    pub fn relative_dir(&self) -> String {
        format!("date={}/hour={:02}", self.date.format("%Y-%m-%d"), self.hour)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flowsrc, self.relative_dir())
    }
}

/// Millisecond timestamp as stored in the `ts`/`te` columns and used for
/// partitioning, capped at the latest instant chrono can represent.
pub fn clamp_timestamp_ms(ms: u64) -> i64 {
    let max = DateTime::<Utc>::MAX_UTC.timestamp_millis();
    i64::try_from(ms).map_or(max, |ms| ms.min(max))
}

/// Resolve the partition a record belongs to.
pub fn resolve(record: &FlowRecord) -> PartitionKey {
    PartitionKey::from_millis(Arc::clone(&record.flowsrc), record.first_seen_ms)
}

/// Sanitize an exporter name for use as a single path segment
///
/// Replaces path separators and shell-hostile characters with underscores.
pub fn sanitize_path_segment(name: &str) -> Cow<'_, str> {
    const INVALID: [char; 10] = ['/', '\\', ' ', ':', '*', '?', '"', '<', '>', '|'];

    if name.is_empty() {
        return Cow::Borrowed("unknown-exporter");
    }

    if name == "." || name == ".." {
        return Cow::Owned(name.replace('.', "_"));
    }

    if name.chars().any(|c| INVALID.contains(&c)) {
        let sanitized = name
            .chars()
            .map(|c| if INVALID.contains(&c) { '_' } else { c })
            .collect::<String>();
        Cow::Owned(sanitized)
    } else {
        Cow::Borrowed(name)
    }
}
