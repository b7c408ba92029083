//! Configuration management for the fraud scoring service

use crate::models::DampenerChain;
use crate::retraining::BoosterParams;
use crate::retraining::evaluate::default_threshold_grid;
use crate::types::{Modality, RiskTierCutpoints};
use anyhow::{bail, Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub scoring: ScoringConfig,
    pub attribution: AttributionConfig,
    pub retraining: RetrainingConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for scoring
    pub score_subject: String,
    /// Request/reply subject for ground-truth feedback
    pub feedback_subject: String,
    pub retrain_status_subject: String,
    pub retrain_trigger_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            score_subject: "fraud.score".to_string(),
            feedback_subject: "fraud.feedback".to_string(),
            retrain_status_subject: "fraud.retrain.status".to_string(),
            retrain_trigger_subject: "fraud.retrain.trigger".to_string(),
        }
    }
}

/// Persistence backend for predictions, feedback and model versions
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Nothing survives a restart
    Memory,
}

/// Model artifacts, datasets and database locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory containing model artifacts, one subdirectory per modality
    pub models_dir: String,
    /// Directory receiving copies of replaced artifacts
    pub backup_dir: String,
    /// Directory containing `{modality}.jsonl` base datasets
    pub data_dir: String,
    pub database_path: String,
    pub storage: StorageBackend,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            backup_dir: "models/backups".to_string(),
            data_dir: "data".to_string(),
            database_path: "data/fraud_scoring.db".to_string(),
            storage: StorageBackend::Sqlite,
        }
    }
}

/// Per-modality decision threshold overrides; unset uses the model's own threshold
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdOverrides {
    pub banking: Option<f64>,
    pub credit_card: Option<f64>,
}

impl ThresholdOverrides {
    pub fn get(&self, modality: Modality) -> Option<f64> {
        match modality {
            Modality::Banking => self.banking,
            Modality::CreditCard => self.credit_card,
        }
    }
}

/// Probability adjustment and tiering
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub thresholds: ThresholdOverrides,
    pub risk_tiers: RiskTierCutpoints,
    /// Ordered dampener table
    pub dampeners: DampenerChain,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Number of ranked contributions per explanation
    pub top_n: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

/// Retraining trigger and run parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrainingConfig {
    /// Feedback rows since the last run that trigger a new one
    pub feedback_threshold: u64,
    /// Fewest feedback samples a non-bootstrap run accepts
    pub min_feedback_samples: usize,
    /// Fewest samples of each class in the merged dataset
    pub min_class_samples: usize,
    /// Minimum F1 gain for promotion
    pub promotion_epsilon: f64,
    /// Held-out share of the merged dataset
    pub test_size: f64,
    /// Target fraud/legitimate ratio after synthetic oversampling
    pub oversample_ratio: f64,
    /// Target fraud/legitimate ratio after majority undersampling
    pub undersample_ratio: f64,
    /// Neighbours considered by synthetic oversampling
    pub smote_k: usize,
    pub seed: u64,
    pub threshold_grid: Vec<f64>,
    pub timeout_secs: u64,
    /// Train a model at start-up for modalities without one
    pub bootstrap: bool,
    pub booster: BoosterParams,
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            feedback_threshold: 50,
            min_feedback_samples: 20,
            min_class_samples: 5,
            promotion_epsilon: 0.01,
            test_size: 0.2,
            oversample_ratio: 0.3,
            undersample_ratio: 0.7,
            smote_k: 3,
            seed: 42,
            threshold_grid: default_threshold_grid(),
            timeout_secs: 1800,
            bootstrap: true,
            booster: BoosterParams::default(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum requests handled concurrently
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break scoring or retraining invariants.
    pub fn validate(&self) -> Result<()> {
        for modality in Modality::ALL {
            if let Some(t) = self.scoring.thresholds.get(modality) {
                if !(0.0..=1.0).contains(&t) {
                    bail!("scoring.thresholds.{modality} must lie in [0, 1], got {t}");
                }
            }
        }
        self.scoring
            .risk_tiers
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid scoring.risk_tiers")?;
        self.scoring
            .dampeners
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid scoring.dampeners")?;

        if self.attribution.top_n == 0 {
            bail!("attribution.top_n must be at least 1");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }

        let r = &self.retraining;
        if !(r.test_size > 0.0 && r.test_size < 1.0) {
            bail!("retraining.test_size must lie in (0, 1), got {}", r.test_size);
        }
        if r.oversample_ratio <= 0.0 || r.undersample_ratio <= 0.0 {
            bail!("retraining sampling ratios must be positive");
        }
        if r.promotion_epsilon < 0.0 {
            bail!("retraining.promotion_epsilon must be non-negative");
        }
        if r.threshold_grid.is_empty() || r.threshold_grid.iter().any(|t| !(0.0..=1.0).contains(t)) {
            bail!("retraining.threshold_grid must be non-empty with values in [0, 1]");
        }
        if r.feedback_threshold == 0 || r.timeout_secs == 0 {
            bail!("retraining.feedback_threshold and timeout_secs must be positive");
        }
        r.booster
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid retraining.booster")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.score_subject, "fraud.score");
        assert_eq!(config.retraining.feedback_threshold, 50);
        assert_eq!(config.retraining.threshold_grid.len(), 9);
        assert_eq!(config.attribution.top_n, 5);
        assert_eq!(config.models.storage, StorageBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_overrides() {
        let overrides = ThresholdOverrides {
            banking: Some(0.4),
            credit_card: None,
        };
        assert_eq!(overrides.get(Modality::Banking), Some(0.4));
        assert_eq!(overrides.get(Modality::CreditCard), None);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[nats]
url = "nats://broker:4222"

[models]
storage = "memory"

[scoring.thresholds]
credit_card = 0.35

[retraining]
feedback_threshold = 10

[retraining.booster]
n_trees = 20
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.nats.url, "nats://broker:4222");
        assert_eq!(config.nats.feedback_subject, "fraud.feedback");
        assert_eq!(config.models.storage, StorageBackend::Memory);
        assert_eq!(config.scoring.thresholds.credit_card, Some(0.35));
        assert_eq!(config.retraining.feedback_threshold, 10);
        assert_eq!(config.retraining.booster.n_trees, 20);
        assert_eq!(config.retraining.booster.max_depth, 3);
        assert_eq!(config.scoring.dampeners, DampenerChain::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.scoring.thresholds.banking = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.risk_tiers.high = 0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retraining.threshold_grid.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = AppConfig::load_from_path("config/config.toml").unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.scoring.dampeners, defaults.scoring.dampeners);
        assert_eq!(config.scoring.risk_tiers, defaults.scoring.risk_tiers);
        assert_eq!(config.retraining.threshold_grid, defaults.retraining.threshold_grid);
        assert_eq!(config.retraining.booster, defaults.retraining.booster);
        assert_eq!(config.models.storage, StorageBackend::Sqlite);
    }
}
