//! anomdash.toml configuration parser.
//!
//! The parsed value is passed explicitly into the pipeline; nothing in the
//! library crates reads the process environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomdashConfig {
    pub kusto: KustoConfig,
    pub grafana: GrafanaConfig,
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KustoConfig {
    /// Cluster URL, e.g. `https://mycluster.westeurope.kusto.windows.net`.
    pub cluster: String,
    pub database: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Resolve the source table against `.show tables` instead of
    /// trusting the first token of the query.
    #[serde(default = "default_true")]
    pub verify_table: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrafanaConfig {
    pub url: String,
    pub api_token: Option<String>,
    /// UID of the Azure Data Explorer datasource panels query through.
    pub datasource_uid: String,
    pub folder_uid: Option<String>,
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub base_query: String,
    /// Defaults to the source table name.
    pub title: Option<String>,
    /// Fixed `make-series` step; sampled from the data when absent.
    pub step: Option<String>,
    #[serde(default = "default_time_from")]
    pub time_from: String,
    #[serde(default = "default_time_to")]
    pub time_to: String,
}

/// Presets offered by the anomaly threshold control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    #[serde(default = "default_presets")]
    pub presets: Vec<f64>,
    /// Initially selected preset; the first preset when absent.
    pub default: Option<f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            presets: default_presets(),
            default: None,
        }
    }
}

impl ThresholdConfig {
    /// Presets rendered the way they appear in the control (`2.0` → `"2"`).
    pub fn preset_values(&self) -> Vec<String> {
        self.presets.iter().map(|p| format!("{p}")).collect()
    }

    pub fn default_value(&self) -> String {
        match self.default {
            Some(d) => format!("{d}"),
            None => self.preset_values().into_iter().next().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.presets.is_empty() {
            return Err(ConfigError::Invalid {
                field: "threshold.presets",
                reason: "at least one preset is required".to_string(),
            });
        }
        if let Some(bad) = self.presets.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(ConfigError::Invalid {
                field: "threshold.presets",
                reason: format!("{bad} is not a positive number"),
            });
        }
        if let Some(d) = self.default {
            if !self.presets.contains(&d) {
                return Err(ConfigError::Invalid {
                    field: "threshold.default",
                    reason: format!("{d} is not one of the presets"),
                });
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_time_from() -> String {
    "now-7d".to_string()
}

fn default_time_to() -> String {
    "now".to_string()
}

fn default_presets() -> Vec<f64> {
    vec![1.5, 2.0, 3.0]
}

impl AnomdashConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AnomdashConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the settings every run needs. Credentials are checked by the
    /// clients that use them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.kusto.cluster, "kusto.cluster")?;
        require(&self.kusto.database, "kusto.database")?;
        require(&self.grafana.url, "grafana.url")?;
        require(&self.grafana.datasource_uid, "grafana.datasource_uid")?;
        require(&self.dashboard.base_query, "dashboard.base_query")?;
        if !self.kusto.cluster.starts_with("https://") && !self.kusto.cluster.starts_with("http://") {
            return Err(ConfigError::Invalid {
                field: "kusto.cluster",
                reason: format!("{} is not an http(s) URL", self.kusto.cluster),
            });
        }
        self.threshold.validate()
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(())
    }
}
