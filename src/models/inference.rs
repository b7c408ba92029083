//! Scoring engine: derivation, inference, dampening and risk tiering

use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::features::{FeatureEngine, FeatureVector};
use crate::models::rules::{AppliedDampener, DampenerChain};
use crate::models::ActiveModel;
use crate::registry::ModelRegistry;
use crate::types::{Label, Modality, RiskTier, RiskTierCutpoints, TransactionRecord};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of scoring one transaction
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// Dampened and clamped fraud probability
    pub probability: f64,
    /// Model output before dampening
    pub raw_probability: f64,
    pub decision: Label,
    pub risk_tier: RiskTier,
    pub threshold_used: f64,
    /// Unscaled features in model-schema order
    pub features: FeatureVector,
    /// Standardized model input
    pub model_input: Vec<f64>,
    pub model_version_id: Uuid,
    pub dampeners_applied: Vec<AppliedDampener>,
    pub time_defaulted: bool,
    /// Model snapshot that produced this score
    pub model: Arc<ActiveModel>,
}

/// Scores transactions against the active model of their modality
pub struct ScoringEngine {
    registry: Arc<ModelRegistry>,
    features: FeatureEngine,
    dampeners: DampenerChain,
    cutpoints: RiskTierCutpoints,
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create a scoring engine reading active models from `registry`
    pub fn new(registry: Arc<ModelRegistry>, config: &ScoringConfig) -> Self {
        Self {
            registry,
            features: FeatureEngine::new(),
            dampeners: config.dampeners.clone(),
            cutpoints: config.risk_tiers.clone(),
            config: config.clone(),
        }
    }

    pub fn cutpoints(&self) -> &RiskTierCutpoints {
        &self.cutpoints
    }

    /// Threshold for a modality: configured override, else the model's own.
    pub fn threshold_for(&self, modality: Modality, model: &ActiveModel) -> f64 {
        self.config
            .thresholds
            .get(modality)
            .unwrap_or(model.version.threshold)
    }

    /// Score a transaction with the active model of its modality.
    pub fn score(&self, record: &TransactionRecord) -> Result<ScoreResult, ScoringError> {
        let modality = record.modality();
        let model = self
            .registry
            .active(modality)
            .ok_or(ScoringError::ModelUnavailable(modality))?;
        self.score_with(record, model)
    }

    /// Score a transaction against a specific model snapshot.
    pub fn score_with(
        &self,
        record: &TransactionRecord,
        model: Arc<ActiveModel>,
    ) -> Result<ScoreResult, ScoringError> {
        let modality = record.modality();
        if model.version.modality != modality {
            return Err(ScoringError::InputValidation(format!(
                "model {} serves {}, transaction is {}",
                model.version.version, model.version.modality, modality
            )));
        }

        let derived = self.features.derive(record);
        if derived.time_defaulted && modality == Modality::Banking {
            warn!(
                modality = %modality,
                timestamp = ?record_timestamp(record),
                "Timestamp missing or unparseable, using neutral time bucket"
            );
        }

        let features = derived.project(&model.schema);
        let model_input = model.model_input(&features);
        let raw_probability = model.model.predict_proba(&model_input)?;

        let (dampened, dampeners_applied) = self.dampeners.apply(record, raw_probability);
        let probability = dampened.clamp(0.0, 1.0);

        let threshold_used = self.threshold_for(modality, &model);
        let decision = Label::from_bool(probability >= threshold_used);
        let risk_tier = RiskTier::from_probability(probability, &self.cutpoints);

        debug!(
            modality = %modality,
            model_version = %model.version.version,
            raw_probability = raw_probability,
            probability = probability,
            dampeners = dampeners_applied.len(),
            risk_tier = %risk_tier,
            "Transaction scored"
        );

        Ok(ScoreResult {
            probability,
            raw_probability,
            decision,
            risk_tier,
            threshold_used,
            features,
            model_input,
            model_version_id: model.version.id,
            dampeners_applied,
            time_defaulted: derived.time_defaulted,
            model,
        })
    }
}

fn record_timestamp(record: &TransactionRecord) -> Option<&str> {
    match record {
        TransactionRecord::Banking(tx) => tx.timestamp.as_deref(),
        TransactionRecord::CreditCard(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::banking_model;
    use crate::registry::test_support::memory_registry;
    use crate::types::BankingTransaction;
    use proptest::prelude::*;

    fn engine_with_model() -> (ScoringEngine, Arc<ActiveModel>) {
        let (registry, _dir) = memory_registry();
        let model = Arc::new(banking_model());
        let engine = ScoringEngine::new(Arc::new(registry), &ScoringConfig::default());
        (engine, model)
    }

    fn scenario_a() -> TransactionRecord {
        BankingTransaction::new(5000.0, 200.0)
            .with_timestamp("2024-03-01 02:30:00")
            .with_channel("ATM Withdrawal")
            .with_card_age(5)
            .with_distance(3500.0)
            .into()
    }

    fn scenario_b() -> TransactionRecord {
        BankingTransaction::new(20.0, 10_000.0)
            .with_timestamp("2024-03-01 14:00:00")
            .with_channel("POS")
            .with_card_age(2000)
            .with_distance(10.0)
            .into()
    }

    #[test]
    fn test_no_active_model_is_fatal() {
        let (registry, _dir) = memory_registry();
        let engine = ScoringEngine::new(Arc::new(registry), &ScoringConfig::default());
        let err = engine.score(&scenario_b()).unwrap_err();
        assert!(matches!(err, ScoringError::ModelUnavailable(Modality::Banking)));
    }

    #[test]
    fn test_high_risk_scenario() {
        let (engine, model) = engine_with_model();
        let result = engine.score_with(&scenario_a(), model).unwrap();

        // margin = 2.0 + 1.5
        assert!((result.raw_probability - crate::models::tree::sigmoid(3.5)).abs() < 1e-12);
        assert!(result.dampeners_applied.is_empty());
        assert_eq!(result.decision, Label::Fraud);
        assert!(matches!(result.risk_tier, RiskTier::High | RiskTier::Critical));
        assert!(!result.time_defaulted);
    }

    #[test]
    fn test_low_risk_scenario() {
        let (engine, model) = engine_with_model();
        let result = engine.score_with(&scenario_b(), model).unwrap();

        assert_eq!(result.decision, Label::Legitimate);
        assert!(matches!(result.risk_tier, RiskTier::Low | RiskTier::Minimal));
        assert!(result.probability <= result.raw_probability);
        assert!(!result.dampeners_applied.is_empty());
    }

    #[test]
    fn test_missing_timestamp_is_not_an_error() {
        let (engine, model) = engine_with_model();
        let record: TransactionRecord = BankingTransaction::new(20.0, 10_000.0)
            .with_timestamp("not a time")
            .into();
        let result = engine.score_with(&record, model).unwrap();
        assert!(result.time_defaulted);
        assert_eq!(result.features.get("hour"), Some(12.0));
    }

    #[test]
    fn test_threshold_override() {
        let (registry, _dir) = memory_registry();
        let mut config = ScoringConfig::default();
        config.thresholds.banking = Some(0.99);
        let engine = ScoringEngine::new(Arc::new(registry), &config);

        let result = engine.score_with(&scenario_a(), Arc::new(banking_model())).unwrap();
        assert_eq!(result.threshold_used, 0.99);
        assert_eq!(result.decision, Label::Legitimate);
    }

    #[test]
    fn test_features_follow_model_schema() {
        let (engine, model) = engine_with_model();
        let result = engine.score_with(&scenario_b(), model.clone()).unwrap();
        assert_eq!(result.features.names, model.schema.names());
        assert_eq!(result.model_version_id, model.version.id);
    }

    #[test]
    fn test_modality_mismatch_rejected() {
        let (engine, model) = engine_with_model();
        let record: TransactionRecord =
            crate::types::CardTransaction::new(vec![0.0; 28], 1.0, 0.0).into();
        assert!(matches!(
            engine.score_with(&record, model),
            Err(ScoringError::InputValidation(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_probability_bounded_and_dampened(
            amount in 0.0f64..20_000.0,
            balance in 0.0f64..50_000.0,
            hour in 0u32..24,
            age in 0u32..3_000,
            distance in 0.0f64..5_000.0,
            failed in 0u32..8,
        ) {
            let (engine, model) = engine_with_model();
            let record: TransactionRecord = BankingTransaction::new(amount, balance)
                .with_timestamp(&format!("2024-03-05 {hour:02}:10:00"))
                .with_card_age(age)
                .with_distance(distance)
                .with_history(amount.max(1.0), failed, 3)
                .into();
            let result = engine.score_with(&record, model).unwrap();
            prop_assert!((0.0..=1.0).contains(&result.probability));
            prop_assert!(result.probability <= result.raw_probability);
        }
    }
}
