// INI sections to typed exporter settings
//
// rust-ini tokenizes the file. On top of it:
// - keys are case-insensitive, repeated sections or keys are errors
// - `[DEFAULT]` values are inherited by every other section, except the
//   process-wide keys
// - each merged section is deserialized into `ExporterSection`, which
//   rejects unknown keys
//
// Quoting and backslash escapes are off so values such as `file_pattern`
// reach the regex parser untouched.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use ini::{Ini, ParseOption, Properties};
use regex::Regex;
use serde::de::value::{Error as ValueError, MapDeserializer};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_SECTION: &str = "DEFAULT";

/// `[DEFAULT]` keys that configure the process rather than an exporter
pub const PROCESS_KEYS: [&str; 3] = ["logfile", "log_level", "parquet_row_group_size"];

type Values = BTreeMap<String, String>;

#[derive(Debug, Default, Clone)]
pub struct Sections {
    defaults: Values,
    /// Exporter sections in file order, `[DEFAULT]` already merged in
    exporters: Vec<(String, Values)>,
}

impl Sections {
    pub fn parse(text: &str) -> Result<Self> {
        let option = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(text, option).map_err(|e| ConfigError::Syntax {
            line: e.line,
            message: e.msg.to_string(),
        })?;

        let mut defaults = Values::new();
        let mut own: Vec<(String, Values)> = Vec::new();
        let mut default_seen = false;

        for (name, props) in ini.iter() {
            let Some(name) = name else {
                if props.iter().next().is_some() {
                    return Err(ConfigError::KeysOutsideSection);
                }
                continue;
            };

            let values = lowercase_keys(name, props)?;
            if name == DEFAULT_SECTION {
                if default_seen {
                    return Err(ConfigError::DuplicateSection {
                        name: name.to_string(),
                    });
                }
                default_seen = true;
                defaults = values;
            } else {
                if own.iter().any(|(existing, _)| existing == name) {
                    return Err(ConfigError::DuplicateSection {
                        name: name.to_string(),
                    });
                }
                own.push((name.to_string(), values));
            }
        }

        let inherited: Values = defaults
            .iter()
            .filter(|(key, _)| !PROCESS_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let exporters = own
            .into_iter()
            .map(|(name, values)| {
                let mut merged = inherited.clone();
                merged.extend(values);
                (name, merged)
            })
            .collect();

        Ok(Self {
            defaults,
            exporters,
        })
    }

    /// Look up `key` in `[DEFAULT]` only.
    pub fn default_value(&self, key: &str) -> Option<&str> {
        self.defaults.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Exporter section names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exporters.iter().map(|(name, _)| name.as_str())
    }

    /// Deserialize every exporter section, in file order.
    pub fn exporters(&self) -> Result<Vec<(&str, ExporterSection)>> {
        self.exporters
            .iter()
            .map(|(name, values)| Ok((name.as_str(), ExporterSection::from_values(name, values)?)))
            .collect()
    }
}

fn lowercase_keys(section: &str, props: &Properties) -> Result<Values> {
    let mut values = Values::new();
    for (key, value) in props.iter() {
        let key = key.to_lowercase();
        if values.contains_key(&key) {
            return Err(ConfigError::DuplicateKey {
                section: section.to_string(),
                key,
            });
        }
        values.insert(key, value.to_string());
    }
    Ok(values)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Delete,
    Archive,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delete" => Ok(PolicyKind::Delete),
            "archive" => Ok(PolicyKind::Archive),
            _ => Err("expected 'delete' or 'archive'".to_string()),
        }
    }
}

/// One exporter section as written. Absent keys keep the exporter defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterSection {
    #[serde(default, deserialize_with = "text")]
    pub watchdir: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub outputdir: Option<String>,
    #[serde(default, deserialize_with = "parsed")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, deserialize_with = "parsed")]
    pub stable_scans: Option<u32>,
    #[serde(default, deserialize_with = "parsed")]
    pub max_batch_rows: Option<usize>,
    #[serde(default, deserialize_with = "parsed")]
    pub truncation_retries: Option<u32>,
    #[serde(default, deserialize_with = "boolean")]
    pub recursive: Option<bool>,
    #[serde(default, deserialize_with = "pattern")]
    pub file_pattern: Option<Regex>,
    #[serde(default, deserialize_with = "parsed")]
    pub write_max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "parsed")]
    pub write_backoff_ms: Option<u64>,
    #[serde(default, deserialize_with = "parsed")]
    pub source_policy: Option<PolicyKind>,
    #[serde(default, deserialize_with = "text")]
    pub archive_dir: Option<String>,
}

impl ExporterSection {
    fn from_values(section: &str, values: &Values) -> Result<Self> {
        let entries = values.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        ExporterSection::deserialize(MapDeserializer::<_, ValueError>::new(entries)).map_err(|e| {
            ConfigError::InvalidSection {
                section: section.to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    String::deserialize(deserializer).map(Some)
}

/// Integers accept `_` separators, as in `100_000`.
fn parsed<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.replace('_', "")
        .parse()
        .map(Some)
        .map_err(|e| de::Error::custom(format!("invalid value '{}': {}", raw, e)))
}

fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<bool>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(Some(true)),
        "0" | "no" | "false" | "off" => Ok(Some(false)),
        _ => Err(de::Error::custom(format!(
            "invalid value '{}': expected a boolean (true/false, yes/no, on/off, 1/0)",
            raw
        ))),
    }
}

fn pattern<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Regex>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Regex::new(&raw)
        .map(Some)
        .map_err(|e| de::Error::custom(format!("invalid file_pattern: {}", e)))
}
