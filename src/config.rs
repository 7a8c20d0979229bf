use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::table::ColumnTypeSchema;

pub const DEFAULT_CONFIG_FILE: &str = "splus-harvest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub transport_retries: Option<u32>,
    #[serde(default)]
    pub transport_backoff_factor: Option<f64>,
    #[serde(default)]
    pub max_band_error: Option<f64>,
    #[serde(default)]
    pub object_class: Option<i32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub combined_dir: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub field_column: Option<String>,
    #[serde(default)]
    pub column_types: Option<ColumnTypeSchema>,
    #[serde(default)]
    pub provenance: Option<ProvenanceEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProvenanceEntry {
    #[serde(default)]
    pub observer: Option<String>,
    #[serde(default)]
    pub telescope: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Application-level retry settings for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// HTTP-level retry settings applied beneath the per-field retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSettings {
    pub retries: u32,
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilters {
    pub max_band_error: f64,
    pub object_class: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceLabels {
    pub observer: String,
    pub telescope: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub retry: RetrySettings,
    pub transport: TransportSettings,
    pub max_workers: usize,
    pub timeout: Duration,
    pub filters: QueryFilters,
    pub output_dir: Utf8PathBuf,
    pub combined_dir: Utf8PathBuf,
    pub input: Utf8PathBuf,
    pub field_column: String,
    pub column_types: ColumnTypeSchema,
    pub provenance: ProvenanceLabels,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `splus-harvest.json` when present, or built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Self::resolve_config(Config::default()));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let provenance = config.provenance.unwrap_or_default();

        ResolvedConfig {
            base_url: config
                .base_url
                .unwrap_or_else(|| "https://splus.cloud".to_string())
                .trim_end_matches('/')
                .to_string(),
            retry: RetrySettings {
                max_retries: config.max_retries.unwrap_or(5).max(1),
                retry_delay: Duration::from_secs(config.retry_delay_secs.unwrap_or(20)),
            },
            transport: TransportSettings {
                retries: config.transport_retries.unwrap_or(5),
                backoff_factor: config.transport_backoff_factor.unwrap_or(2.0),
            },
            max_workers: config.max_workers.unwrap_or(4).max(1),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(30)),
            filters: QueryFilters {
                max_band_error: config.max_band_error.unwrap_or(0.3),
                object_class: config.object_class.unwrap_or(1),
            },
            output_dir: Utf8PathBuf::from(
                config
                    .output_dir
                    .unwrap_or_else(|| "splus_results".to_string()),
            ),
            combined_dir: Utf8PathBuf::from(config.combined_dir.unwrap_or_else(|| ".".to_string())),
            input: Utf8PathBuf::from(
                config
                    .input
                    .unwrap_or_else(|| "iDR5_pointings.csv".to_string()),
            ),
            field_column: config
                .field_column
                .unwrap_or_else(|| "iDR5_Field_Name".to_string()),
            column_types: config.column_types.unwrap_or_default(),
            provenance: ProvenanceLabels {
                observer: provenance.observer.unwrap_or_else(|| "LUIS".to_string()),
                telescope: provenance.telescope.unwrap_or_else(|| "S-PLUS".to_string()),
                version: provenance.version.unwrap_or_else(|| "iDR5".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_batch_policy() {
        let resolved = ResolvedConfig::default();
        assert_eq!(resolved.retry.max_retries, 5);
        assert_eq!(resolved.retry.retry_delay, Duration::from_secs(20));
        assert_eq!(resolved.max_workers, 4);
        assert_eq!(resolved.timeout, Duration::from_secs(30));
        assert_eq!(resolved.transport.retries, 5);
        assert_eq!(resolved.filters.max_band_error, 0.3);
    }

    #[test]
    fn zero_workers_clamped() {
        let resolved = ConfigLoader::resolve_config(Config {
            max_workers: Some(0),
            ..Config::default()
        });
        assert_eq!(resolved.max_workers, 1);
    }
}
