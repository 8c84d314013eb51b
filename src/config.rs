use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::constants::DEFAULT_SOURCE_URL;
use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "epi_report.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub report: ReportConfig,
    /// Jurisdictions of interest. Order is the column priority in the report.
    pub jurisdictions: Vec<String>,
    pub gates: GateConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// How far past today the newest source date may sit
    pub max_future_days: i64,
    /// Plausible bounds for the 7-day incidence per 100k
    pub incidence_range: (f64, f64),
    /// Pins "today" for the date-sanity rule so reruns of a snapshot are reproducible
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub window: usize,
    /// Plausible bounds for the weekly growth factor; rows outside are dropped
    pub growth_range: (f64, f64),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            report: ReportConfig::default(),
            jurisdictions: vec!["Ecuador".to_string(), "Peru".to_string()],
            gates: GateConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_future_days: 30,
            incidence_range: (0.0, 2000.0),
            reference_date: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: 7,
            growth_range: (0.0, 10.0),
        }
    }
}

impl Config {
    /// Load from an explicit TOML file. A missing or malformed file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file if present, otherwise fall back to defaults.
    pub fn load_or_default() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load(DEFAULT_CONFIG_PATH)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `EPI_SOURCE_URL` and `EPI_OUTPUT_DIR` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("EPI_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("EPI_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.report.output_dir = dir.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.jurisdictions.is_empty() {
            return Err(PipelineError::Config(
                "at least one jurisdiction is required".to_string(),
            ));
        }
        if self.metrics.window == 0 {
            return Err(PipelineError::Config("metrics.window must be positive".to_string()));
        }
        let (lo, hi) = self.metrics.growth_range;
        if lo > hi {
            return Err(PipelineError::Config(format!(
                "metrics.growth_range is inverted: [{lo}, {hi}]"
            )));
        }
        let (lo, hi) = self.gates.incidence_range;
        if lo > hi {
            return Err(PipelineError::Config(format!(
                "gates.incidence_range is inverted: [{lo}, {hi}]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_track_ecuador_then_peru() {
        let config = Config::default();
        assert_eq!(config.jurisdictions, vec!["Ecuador", "Peru"]);
        assert_eq!(config.metrics.window, 7);
        assert_eq!(config.gates.max_future_days, 30);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            jurisdictions = ["Peru", "Ecuador"]

            [source]
            timeout_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.jurisdictions, vec!["Peru", "Ecuador"]);
        assert_eq!(config.source.timeout_seconds, 5);
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.metrics.growth_range, (0.0, 10.0));
    }

    #[test]
    fn test_reference_date_pins_today() {
        let config = Config::from_toml(
            r#"
            [gates]
            reference_date = "2021-06-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.gates.reference_date, NaiveDate::from_ymd_opt(2021, 6, 1));
    }

    #[test]
    fn test_empty_jurisdictions_rejected() {
        let err = Config::from_toml("jurisdictions = []").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
