//! Service facade wiring scoring, explanation, audit, feedback and retraining

use crate::config::{AppConfig, StorageBackend};
use crate::error::{
    ExplanationProviderError, FeedbackError, PersistenceError, RegistryError, RetrainError, ScoringError,
};
use crate::feedback::FeedbackIngestor;
use crate::metrics::PipelineMetrics;
use crate::models::rules::AppliedDampener;
use crate::models::{
    ArtifactStore, AttributionEngine, AttributionMethod, FsArtifactStore, NarrativeProvider, NarrativeRequest,
    ScoringEngine, TemplateNarrator,
};
use crate::registry::{ModelRegistry, PromotionPolicy};
use crate::retraining::trigger::RunHandle;
use crate::retraining::{DatasetSource, JsonlDatasetSource, RetrainingRunner, RetrainingStatus, RetrainingTrigger};
use crate::store::{MemoryStore, SqliteStore, Store};
use crate::types::{
    Contribution, FeedbackRecord, Label, Modality, ModelVersion, NarrativeSource, Outcome, OutcomeSummary,
    PredictionRecord, RetrainingRun, RiskTier, TransactionRecord,
};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Reply to a scoring request
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResponse {
    /// Absent when the audit write failed
    pub prediction_id: Option<Uuid>,
    pub modality: Modality,
    pub probability: f64,
    pub raw_probability: f64,
    pub decision: Label,
    pub risk_tier: RiskTier,
    pub recommended_action: &'static str,
    pub threshold_used: f64,
    pub attribution: Vec<Contribution>,
    pub attribution_method: AttributionMethod,
    pub degraded: bool,
    pub narrative: String,
    pub narrative_source: NarrativeSource,
    pub model_version_id: Uuid,
    pub dampeners_applied: Vec<AppliedDampener>,
    pub time_defaulted: bool,
}

/// Ground-truth submission
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub prediction_id: Uuid,
    pub actual_label: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Live quality of a modality computed from labeled predictions
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackAnalytics {
    pub modality: Modality,
    #[serde(flatten)]
    pub summary: OutcomeSummary,
    pub labeled: u64,
    pub feedback_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Modality named by a request (`modality` or `mode`), banking when absent.
pub fn request_modality(request: &Value) -> Result<Modality, ScoringError> {
    match request.get("modality").or_else(|| request.get("mode")) {
        None | Some(Value::Null) => Ok(Modality::Banking),
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(ScoringError::InputValidation(format!(
            "modality must be a string, got {other}"
        ))),
    }
}

pub struct FraudService {
    store: Arc<dyn Store>,
    registry: Arc<ModelRegistry>,
    source: Arc<dyn DatasetSource>,
    scoring: ScoringEngine,
    attribution: AttributionEngine,
    narrator: Option<Arc<dyn NarrativeProvider>>,
    template: TemplateNarrator,
    feedback: FeedbackIngestor,
    trigger: Arc<RetrainingTrigger>,
    metrics: Arc<PipelineMetrics>,
    bootstrap: bool,
}

impl FraudService {
    /// Wire every component over the given collaborators.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Store>,
        artifacts: Arc<dyn ArtifactStore>,
        source: Arc<dyn DatasetSource>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let policy = PromotionPolicy {
            epsilon: config.retraining.promotion_epsilon,
        };
        let registry = Arc::new(ModelRegistry::new(store.clone(), artifacts, policy));
        let runner = RetrainingRunner::new(
            registry.clone(),
            store.clone(),
            source.clone(),
            config.retraining.clone(),
        );
        let trigger = Arc::new(RetrainingTrigger::new(
            Arc::new(runner),
            store.clone(),
            metrics.clone(),
            config.retraining.feedback_threshold,
            Duration::from_secs(config.retraining.timeout_secs),
        ));

        Self {
            scoring: ScoringEngine::new(registry.clone(), &config.scoring),
            attribution: AttributionEngine::new(config.attribution.top_n),
            narrator: None,
            template: TemplateNarrator,
            feedback: FeedbackIngestor::new(store.clone(), trigger.clone(), metrics.clone()),
            store,
            registry,
            source,
            trigger,
            metrics,
            bootstrap: config.retraining.bootstrap,
        }
    }

    /// Build the service from configuration: database, artifact directory and base datasets.
    pub fn open(config: &AppConfig, metrics: Arc<PipelineMetrics>) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.models.storage {
            StorageBackend::Sqlite => Arc::new(
                SqliteStore::open(&config.models.database_path)
                    .with_context(|| format!("Failed to open database {}", config.models.database_path))?,
            ),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let artifacts = Arc::new(FsArtifactStore::new(&config.models.models_dir, &config.models.backup_dir));
        let source = Arc::new(JsonlDatasetSource::new(&config.models.data_dir));
        Ok(Self::new(config, store, artifacts, source, metrics))
    }

    /// Use an external narrative provider; the template remains the fallback.
    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeProvider>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Load persisted active models, then bootstrap modalities that have base
    /// data but no model.
    pub async fn start(&self) {
        for (modality, result) in self.registry.load_active() {
            if let Err(e) = result {
                error!(modality = %modality, error = %e, "Active model could not be restored");
            }
        }
        if !self.bootstrap {
            return;
        }

        for modality in Modality::ALL {
            if self.registry.has_active(modality) || !self.source.has_data(modality) {
                continue;
            }
            info!(modality = %modality, "No active model, bootstrapping from base data");
            let handle = match self.trigger.trigger_bootstrap(modality) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(modality = %modality, error = %e, "Bootstrap not started");
                    continue;
                }
            };
            match handle.await {
                Ok(Ok(run)) => info!(modality = %modality, decision = run.decision.label(), "Bootstrap finished"),
                Ok(Err(e)) => warn!(modality = %modality, error = %e, "Bootstrap failed"),
                Err(e) => error!(modality = %modality, error = %e, "Bootstrap task failed"),
            }
        }
    }

    /// Score a raw JSON request.
    pub fn score(&self, request: &Value) -> Result<ScoreResponse, ScoringError> {
        let modality = request_modality(request)?;
        let record = TransactionRecord::from_json(modality, request)?;
        self.score_record(record)
    }

    /// Score a parsed transaction, explain it and write the audit row.
    ///
    /// Audit and narrative failures are logged and never fail the request.
    pub fn score_record(&self, record: TransactionRecord) -> Result<ScoreResponse, ScoringError> {
        let start = Instant::now();
        let modality = record.modality();

        let result = match self.scoring.score(&record) {
            Ok(result) => result,
            Err(e) => {
                self.metrics.record_scoring_error();
                warn!(modality = %modality, error = %e, "Scoring failed");
                return Err(e);
            }
        };

        let attribution = self
            .attribution
            .explain(&result.features, &result.model_input, &result.model, result.probability);
        if attribution.degraded {
            self.metrics.record_degraded_attribution();
        }
        if result.time_defaulted {
            self.metrics.record_time_defaulted();
        }

        let (narrative, narrative_source) = self.narrate(&NarrativeRequest {
            modality,
            probability: result.probability,
            decision: result.decision,
            risk_tier: result.risk_tier,
            amount: record.amount(),
            attribution: &attribution.contributions,
        });

        let prediction = PredictionRecord {
            id: Uuid::new_v4(),
            modality,
            transaction: record,
            features: result.features.clone(),
            raw_probability: result.raw_probability,
            probability: result.probability,
            decision: result.decision,
            risk_tier: result.risk_tier,
            threshold_used: result.threshold_used,
            attribution: attribution.contributions.clone(),
            narrative: narrative.clone(),
            narrative_source,
            model_version_id: result.model_version_id,
            created_at: Utc::now(),
            actual_label: None,
            feedback_received_at: None,
        };
        let prediction_id = match self.store.insert_prediction(&prediction) {
            Ok(()) => Some(prediction.id),
            Err(e) => {
                warn!(modality = %modality, error = %e, "Failed to write prediction audit record");
                None
            }
        };

        let elapsed = start.elapsed();
        self.metrics
            .record_score(elapsed, result.probability, result.risk_tier, result.decision.is_fraud());
        info!(
            prediction_id = ?prediction_id,
            modality = %modality,
            probability = result.probability,
            risk_tier = %result.risk_tier,
            decision = u8::from(result.decision),
            processing_time_us = elapsed.as_micros() as u64,
            "Transaction scored"
        );

        Ok(ScoreResponse {
            prediction_id,
            modality,
            probability: result.probability,
            raw_probability: result.raw_probability,
            decision: result.decision,
            risk_tier: result.risk_tier,
            recommended_action: result.risk_tier.recommended_action(),
            threshold_used: result.threshold_used,
            attribution: attribution.contributions,
            attribution_method: attribution.method,
            degraded: attribution.degraded,
            narrative,
            narrative_source,
            model_version_id: result.model_version_id,
            dampeners_applied: result.dampeners_applied,
            time_defaulted: result.time_defaulted,
        })
    }

    fn narrate(&self, request: &NarrativeRequest<'_>) -> (String, NarrativeSource) {
        if let Some(provider) = &self.narrator {
            let failure = match provider.narrate(request) {
                Ok(text) if !text.trim().is_empty() => return (text, NarrativeSource::Provider),
                Ok(_) => ExplanationProviderError::Empty,
                Err(e) => e,
            };
            warn!(error = %failure, "Narrative provider failed, using template");
            self.metrics.record_narrative_fallback();
        }
        (self.template.render(request), NarrativeSource::Template)
    }

    pub fn submit_feedback(
        &self,
        prediction_id: Uuid,
        actual_label: i64,
        note: Option<&str>,
    ) -> Result<FeedbackRecord, FeedbackError> {
        self.feedback.submit(prediction_id, actual_label, note)
    }

    /// Feedback entry point that reports failures in the response body.
    pub fn handle_feedback(&self, request: &FeedbackRequest) -> FeedbackResponse {
        match self.submit_feedback(request.prediction_id, request.actual_label, request.note.as_deref()) {
            Ok(record) => FeedbackResponse {
                accepted: true,
                outcome: Some(record.outcome),
                message: None,
            },
            Err(e) => FeedbackResponse {
                accepted: false,
                outcome: None,
                message: Some(e.to_string()),
            },
        }
    }

    pub fn retraining_status(&self, modality: Modality) -> Result<RetrainingStatus, PersistenceError> {
        self.trigger.status(modality)
    }

    pub fn trigger_retraining(&self, modality: Modality) -> Result<RunHandle, RetrainError> {
        self.trigger.trigger_manual(modality)
    }

    pub fn retraining_runs(&self, modality: Modality, limit: usize) -> Result<Vec<RetrainingRun>, PersistenceError> {
        self.store.retraining_runs(modality, limit)
    }

    pub fn analytics(&self, modality: Modality) -> Result<FeedbackAnalytics, PersistenceError> {
        let summary = self.store.outcome_summary(modality)?;
        Ok(FeedbackAnalytics {
            modality,
            labeled: summary.labeled(),
            feedback_rate: summary.feedback_rate(),
            precision: summary.precision(),
            recall: summary.recall(),
            f1: summary.f1(),
            summary,
        })
    }

    pub fn prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>, PersistenceError> {
        self.store.get_prediction(id)
    }

    pub fn recent_predictions(
        &self,
        modality: Option<Modality>,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, PersistenceError> {
        self.store.recent_predictions(modality, limit)
    }

    /// Registered versions of a modality, newest first.
    pub fn model_versions(&self, modality: Modality) -> Result<Vec<ModelVersion>, RegistryError> {
        self.registry.versions(modality)
    }
}
