//! Persistence of predictions, feedback, model versions and retraining runs

pub mod memory;
pub mod sqlite;

use crate::error::PersistenceError;
use crate::types::{
    FeedbackRecord, Label, LabeledTransaction, Modality, ModelStatus, ModelVersion, OutcomeSummary,
    PredictionRecord, RetrainingRun,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Relational persistence collaborator
pub trait Store: Send + Sync {
    fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), PersistenceError>;

    fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>, PersistenceError>;

    /// Most recent predictions first.
    fn recent_predictions(
        &self,
        modality: Option<Modality>,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, PersistenceError>;

    /// Set the ground-truth label of a prediction and append the feedback row
    /// in one unit of work. Fails with `AlreadyLabeled` on re-submission.
    fn record_feedback(
        &self,
        prediction_id: Uuid,
        actual_label: Label,
        note: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedbackRecord, PersistenceError>;

    /// Feedback rows for a modality received strictly after `since` (all when `None`).
    fn feedback_count_since(
        &self,
        modality: Modality,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, PersistenceError>;

    /// Every labeled prediction of a modality, as retraining samples.
    fn labeled_transactions(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, PersistenceError>;

    fn outcome_summary(&self, modality: Modality) -> Result<OutcomeSummary, PersistenceError>;

    fn insert_model_version(&self, version: &ModelVersion) -> Result<(), PersistenceError>;

    fn active_model_version(&self, modality: Modality) -> Result<Option<ModelVersion>, PersistenceError>;

    /// Versions of a modality, newest first.
    fn model_versions(&self, modality: Modality) -> Result<Vec<ModelVersion>, PersistenceError>;

    /// Archive the current active version and activate `id`, atomically.
    fn activate_model_version(&self, modality: Modality, id: Uuid) -> Result<(), PersistenceError>;

    fn set_model_status(&self, id: Uuid, status: ModelStatus) -> Result<(), PersistenceError>;

    fn insert_retraining_run(&self, run: &RetrainingRun) -> Result<(), PersistenceError>;

    fn last_retraining_run(&self, modality: Modality) -> Result<Option<RetrainingRun>, PersistenceError>;

    /// Runs of a modality, newest first.
    fn retraining_runs(&self, modality: Modality, limit: usize) -> Result<Vec<RetrainingRun>, PersistenceError>;
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every `Store` implementation must share

    use super::*;
    use crate::features::FeatureVector;
    use crate::types::{
        BankingTransaction, ModelMetrics, NarrativeSource, Outcome, RiskTier, RunDecision,
        SampleComposition, TriggerReason,
    };
    use chrono::Duration;

    pub fn prediction(modality_amount: f64, decision: Label) -> PredictionRecord {
        PredictionRecord {
            id: Uuid::new_v4(),
            modality: Modality::Banking,
            transaction: BankingTransaction::new(modality_amount, 1000.0).into(),
            features: FeatureVector {
                names: vec!["amount".to_string()],
                values: vec![modality_amount],
            },
            raw_probability: 0.6,
            probability: 0.55,
            decision,
            risk_tier: RiskTier::High,
            threshold_used: 0.5,
            attribution: Vec::new(),
            narrative: "text".to_string(),
            narrative_source: NarrativeSource::Template,
            model_version_id: Uuid::new_v4(),
            created_at: Utc::now(),
            actual_label: None,
            feedback_received_at: None,
        }
    }

    pub fn version(modality: Modality, label: &str) -> ModelVersion {
        ModelVersion {
            id: Uuid::new_v4(),
            version: label.to_string(),
            modality,
            artifact_ref: format!("{modality}/{label}.json"),
            threshold: 0.4,
            metrics: ModelMetrics {
                f1: 0.7,
                ..Default::default()
            },
            status: ModelStatus::Candidate,
            is_active: false,
            created_at: Utc::now(),
        }
    }

    fn run(modality: Modality, started_at: DateTime<Utc>) -> RetrainingRun {
        RetrainingRun {
            id: Uuid::new_v4(),
            modality,
            trigger_reason: TriggerReason::Manual,
            started_at,
            finished_at: started_at + Duration::seconds(5),
            composition: SampleComposition::default(),
            candidate_metrics: None,
            selected_threshold: None,
            candidate_version_id: None,
            f1_improvement: None,
            decision: RunDecision::Rejected,
        }
    }

    pub fn prediction_round_trip(store: &dyn Store) {
        let record = prediction(42.0, Label::Fraud);
        store.insert_prediction(&record).unwrap();

        let loaded = store.get_prediction(record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get_prediction(Uuid::new_v4()).unwrap().is_none());

        let second = prediction(7.0, Label::Legitimate);
        store.insert_prediction(&second).unwrap();
        let recent = store.recent_predictions(Some(Modality::Banking), 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(store.recent_predictions(Some(Modality::CreditCard), 10).unwrap().is_empty());
        assert_eq!(store.recent_predictions(None, 1).unwrap().len(), 1);
    }

    pub fn feedback_is_set_once(store: &dyn Store) {
        let record = prediction(42.0, Label::Fraud);
        store.insert_prediction(&record).unwrap();

        let feedback = store
            .record_feedback(record.id, Label::Legitimate, "customer confirmed", Utc::now())
            .unwrap();
        assert_eq!(feedback.outcome, Outcome::FalsePositive);

        let again = store.record_feedback(record.id, Label::Fraud, "", Utc::now());
        assert!(matches!(again, Err(PersistenceError::AlreadyLabeled(_))));

        let loaded = store.get_prediction(record.id).unwrap().unwrap();
        assert_eq!(loaded.actual_label, Some(Label::Legitimate));
        assert!(loaded.feedback_received_at.is_some());

        let missing = store.record_feedback(Uuid::new_v4(), Label::Fraud, "", Utc::now());
        assert!(matches!(missing, Err(PersistenceError::PredictionNotFound(_))));

        let labeled = store.labeled_transactions(Modality::Banking).unwrap();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].label, Label::Legitimate);
    }

    pub fn feedback_counts_and_summary(store: &dyn Store) {
        let start = Utc::now() - Duration::hours(1);
        for (i, (decision, actual)) in [
            (Label::Fraud, Label::Fraud),
            (Label::Fraud, Label::Legitimate),
            (Label::Legitimate, Label::Legitimate),
            (Label::Legitimate, Label::Fraud),
        ]
        .into_iter()
        .enumerate()
        {
            let record = prediction(10.0 * i as f64, decision);
            store.insert_prediction(&record).unwrap();
            store
                .record_feedback(record.id, actual, "", start + Duration::minutes(i as i64 * 10))
                .unwrap();
        }
        for i in 0..3 {
            let record = prediction(100.0 + i as f64, Label::Fraud);
            store.insert_prediction(&record).unwrap();
            store.record_feedback(record.id, Label::Fraud, "", start).unwrap();
        }
        store.insert_prediction(&prediction(1.0, Label::Fraud)).unwrap();

        assert_eq!(store.feedback_count_since(Modality::Banking, None).unwrap(), 7);
        assert_eq!(
            store
                .feedback_count_since(Modality::Banking, Some(start + Duration::minutes(15)))
                .unwrap(),
            2
        );
        assert_eq!(store.feedback_count_since(Modality::CreditCard, None).unwrap(), 0);

        let summary = store.outcome_summary(Modality::Banking).unwrap();
        assert_eq!(summary.total_predictions, 8);
        assert_eq!(summary.true_positives, 4);
        assert_eq!(summary.false_positives, 1);
        assert_eq!(summary.true_negatives, 1);
        assert_eq!(summary.false_negatives, 1);
    }

    pub fn single_active_version(store: &dyn Store) {
        let v1 = version(Modality::Banking, "banking_v1");
        let v2 = version(Modality::Banking, "banking_v2");
        let card = version(Modality::CreditCard, "credit_card_v1");
        for v in [&v1, &v2, &card] {
            store.insert_model_version(v).unwrap();
        }
        assert!(store.active_model_version(Modality::Banking).unwrap().is_none());

        store.activate_model_version(Modality::Banking, v1.id).unwrap();
        store.activate_model_version(Modality::CreditCard, card.id).unwrap();
        store.activate_model_version(Modality::Banking, v2.id).unwrap();

        let active = store.active_model_version(Modality::Banking).unwrap().unwrap();
        assert_eq!(active.id, v2.id);
        assert_eq!(active.status, ModelStatus::Active);

        let versions = store.model_versions(Modality::Banking).unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
        let archived = versions.iter().find(|v| v.id == v1.id).unwrap();
        assert_eq!(archived.status, ModelStatus::Archived);

        let card_active = store.active_model_version(Modality::CreditCard).unwrap().unwrap();
        assert_eq!(card_active.id, card.id);

        assert!(matches!(
            store.activate_model_version(Modality::Banking, Uuid::new_v4()),
            Err(PersistenceError::ModelVersionNotFound(_))
        ));
        assert!(matches!(
            store.activate_model_version(Modality::Banking, card.id),
            Err(PersistenceError::ModelVersionNotFound(_))
        ));
        assert_eq!(
            store.active_model_version(Modality::Banking).unwrap().unwrap().id,
            v2.id
        );

        store.set_model_status(v1.id, ModelStatus::Evaluated).unwrap();
        let versions = store.model_versions(Modality::Banking).unwrap();
        assert_eq!(
            versions.iter().find(|v| v.id == v1.id).unwrap().status,
            ModelStatus::Evaluated
        );
        store.set_model_status(v1.id, ModelStatus::Rejected).unwrap();
        let versions = store.model_versions(Modality::Banking).unwrap();
        assert_eq!(
            versions.iter().find(|v| v.id == v1.id).unwrap().status,
            ModelStatus::Rejected
        );
    }

    pub fn retraining_runs(store: &dyn Store) {
        assert!(store.last_retraining_run(Modality::Banking).unwrap().is_none());
        let older = run(Modality::Banking, Utc::now() - Duration::hours(2));
        let newer = run(Modality::Banking, Utc::now() - Duration::hours(1));
        store.insert_retraining_run(&older).unwrap();
        store.insert_retraining_run(&newer).unwrap();
        store.insert_retraining_run(&run(Modality::CreditCard, Utc::now())).unwrap();

        let last = store.last_retraining_run(Modality::Banking).unwrap().unwrap();
        assert_eq!(last, newer);
        let runs = store.retraining_runs(Modality::Banking, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
    }
}
