//! Configuration Module
//!
//! Provides TOML-based configuration for the honeypot analyzer.
//! Every option is independently defaulted, so a partial file (or none at
//! all) is valid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub snowshoe: SnowshoeConfig,
    pub longtail: LongtailConfig,
    pub classifier: ClassifierConfig,
    pub store: StoreConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        self.snowshoe.validate()?;
        self.longtail.validate()?;
        self.classifier.validate()?;
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be between 0.0 and 1.0", name);
    }
    Ok(())
}

/// Snowshoe detector configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SnowshoeConfig {
    /// Upper bound of sessions per IP for the low-volume ratio
    pub single_attempt_threshold: usize,
    /// DBSCAN epsilon for timing clustering, in hours
    pub time_cluster_eps_hours: f64,
    /// DBSCAN minimum samples for timing clustering
    pub min_cluster_size: usize,
    /// Diversity score at or above which the population counts as diverse
    pub geographic_diversity_threshold: f64,
    /// Composite score at or above which a snowshoe verdict is returned
    pub sensitivity_threshold: f64,
    /// Accept RFC 1918 / unique-local source addresses as attacker IPs
    pub allow_private_addresses: bool,
}

impl Default for SnowshoeConfig {
    fn default() -> Self {
        Self {
            single_attempt_threshold: 5,
            time_cluster_eps_hours: 0.1,
            min_cluster_size: 5,
            geographic_diversity_threshold: 0.7,
            sensitivity_threshold: 0.7,
            allow_private_addresses: false,
        }
    }
}

impl SnowshoeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.single_attempt_threshold == 0 {
            anyhow::bail!("single_attempt_threshold must be greater than 0");
        }
        if !(self.time_cluster_eps_hours > 0.0 && self.time_cluster_eps_hours.is_finite()) {
            anyhow::bail!("time_cluster_eps_hours must be a positive number");
        }
        if self.min_cluster_size < 2 {
            anyhow::bail!("min_cluster_size must be at least 2");
        }
        check_unit_interval(
            "geographic_diversity_threshold",
            self.geographic_diversity_threshold,
        )?;
        check_unit_interval("sensitivity_threshold", self.sensitivity_threshold)?;
        Ok(())
    }
}

/// Longtail analyzer configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LongtailConfig {
    /// Fraction of all command observations at or below which a command is rare
    pub rarity_threshold: f64,
    /// Number of leading commands that form a session's sequence
    pub sequence_window: usize,
    /// DBSCAN epsilon for sequence (cosine) clustering
    pub cluster_eps: f64,
    /// DBSCAN epsilon for behavior vectors; falls back to `cluster_eps`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_eps: Option<f64>,
    /// DBSCAN minimum samples
    pub min_cluster_size: usize,
    /// Normalized entropy threshold reserved for high-entropy payload detection
    pub entropy_threshold: f64,
    /// Use TF-IDF vectors for sequence clustering
    pub vector_analysis_enabled: bool,
    /// Vocabulary cap for the TF-IDF vectorizer
    pub max_features: usize,
}

impl Default for LongtailConfig {
    fn default() -> Self {
        Self {
            rarity_threshold: 0.05,
            sequence_window: 5,
            cluster_eps: 0.3,
            behavior_eps: None,
            min_cluster_size: 5,
            entropy_threshold: 0.8,
            vector_analysis_enabled: true,
            max_features: 1000,
        }
    }
}

impl LongtailConfig {
    /// Epsilon used for behavior-vector clustering.
    pub fn behavior_eps(&self) -> f64 {
        self.behavior_eps.unwrap_or(self.cluster_eps)
    }

    pub fn validate(&self) -> Result<()> {
        check_unit_interval("rarity_threshold", self.rarity_threshold)?;
        check_unit_interval("entropy_threshold", self.entropy_threshold)?;
        if self.sequence_window == 0 {
            anyhow::bail!("sequence_window must be greater than 0");
        }
        if !(self.cluster_eps > 0.0 && self.cluster_eps.is_finite()) {
            anyhow::bail!("cluster_eps must be a positive number");
        }
        if !(self.behavior_eps() > 0.0 && self.behavior_eps().is_finite()) {
            anyhow::bail!("behavior_eps must be a positive number");
        }
        if self.min_cluster_size < 2 {
            anyhow::bail!("min_cluster_size must be at least 2");
        }
        if self.max_features == 0 {
            anyhow::bail!("max_features must be greater than 0");
        }
        Ok(())
    }
}

/// Infrastructure classifier configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Case-insensitive substrings identifying cloud/hosting providers
    pub cloud_keywords: Vec<String>,
    /// Enrichment younger than this many days is fresh
    pub fresh_days: f64,
    /// Enrichment older than this many days is stale
    pub stale_days: f64,
    /// Report `none` confidence for stale enrichment regardless of match
    pub stale_as_none: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cloud_keywords: [
                "amazon",
                "aws",
                "google",
                "microsoft",
                "azure",
                "digitalocean",
                "linode",
                "vultr",
                "ovh",
                "hetzner",
                "alibaba",
                "tencent",
                "oracle",
                "contabo",
                "scaleway",
                "choopa",
                "leaseweb",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fresh_days: 30.0,
            stale_days: 365.0,
            stale_as_none: false,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.fresh_days >= 0.0 && self.fresh_days <= self.stale_days) {
            anyhow::bail!("fresh_days must be non-negative and not exceed stale_days");
        }
        Ok(())
    }
}

/// Result store configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path
    pub database_path: PathBuf,
    /// Attempt per-session vector persistence when the database supports it
    pub persist_vectors: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("honeypot-analysis.sqlite"),
            persist_vectors: true,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            verbose: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.snowshoe.single_attempt_threshold, 5);
        assert_eq!(config.snowshoe.time_cluster_eps_hours, 0.1);
        assert_eq!(config.snowshoe.min_cluster_size, 5);
        assert_eq!(config.snowshoe.geographic_diversity_threshold, 0.7);
        assert_eq!(config.snowshoe.sensitivity_threshold, 0.7);
        assert!(!config.snowshoe.allow_private_addresses);
        assert_eq!(config.longtail.rarity_threshold, 0.05);
        assert_eq!(config.longtail.sequence_window, 5);
        assert_eq!(config.longtail.cluster_eps, 0.3);
        assert!(config.longtail.vector_analysis_enabled);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.snowshoe.min_cluster_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.longtail.min_cluster_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.longtail.rarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.longtail.behavior_eps = Some(-1.0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.classifier.fresh_days = 400.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_behavior_eps_fallback() {
        let mut config = LongtailConfig::default();
        assert_eq!(config.behavior_eps(), 0.3);
        config.behavior_eps = Some(1.5);
        assert_eq!(config.behavior_eps(), 1.5);
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[snowshoe]"));
        assert!(config_str.contains("[longtail]"));
        assert!(config_str.contains("[classifier]"));
        assert!(config_str.contains("[store]"));
        assert!(config_str.contains("[output]"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[snowshoe]
sensitivity_threshold = 0.6
allow_private_addresses = true

[longtail]
rarity_threshold = 0.01
vector_analysis_enabled = false

[classifier]
stale_as_none = true

[output]
format = "json"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.snowshoe.sensitivity_threshold, 0.6);
        assert!(config.snowshoe.allow_private_addresses);
        assert_eq!(config.snowshoe.min_cluster_size, 5);
        assert_eq!(config.longtail.rarity_threshold, 0.01);
        assert!(!config.longtail.vector_analysis_enabled);
        assert!(config.classifier.stale_as_none);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.validate().is_ok());
    }
}
