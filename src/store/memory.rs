//! In-memory store for tests and ephemeral deployments

use super::Store;
use crate::error::PersistenceError;
use crate::types::{
    FeedbackRecord, Label, LabeledTransaction, Modality, ModelStatus, ModelVersion, Outcome,
    OutcomeSummary, PredictionRecord, RetrainingRun,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    predictions: HashMap<Uuid, PredictionRecord>,
    /// Insertion order of predictions
    order: Vec<Uuid>,
    feedback: Vec<FeedbackRecord>,
    versions: Vec<ModelVersion>,
    runs: Vec<RetrainingRun>,
}

/// `Store` backed by a single mutex-guarded state
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, PersistenceError> {
        self.inner.lock().map_err(|_| PersistenceError::LockPoisoned)
    }
}

impl Store for MemoryStore {
    fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        if inner.predictions.insert(record.id, record.clone()).is_none() {
            inner.order.push(record.id);
        }
        Ok(())
    }

    fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>, PersistenceError> {
        Ok(self.lock()?.predictions.get(&id).cloned())
    }

    fn recent_predictions(
        &self,
        modality: Option<Modality>,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, PersistenceError> {
        let inner = self.lock()?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.predictions.get(id))
            .filter(|p| modality.map_or(true, |m| p.modality == m))
            .take(limit)
            .cloned()
            .collect())
    }

    fn record_feedback(
        &self,
        prediction_id: Uuid,
        actual_label: Label,
        note: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedbackRecord, PersistenceError> {
        let mut inner = self.lock()?;
        let prediction = inner
            .predictions
            .get_mut(&prediction_id)
            .ok_or(PersistenceError::PredictionNotFound(prediction_id))?;
        if prediction.actual_label.is_some() {
            return Err(PersistenceError::AlreadyLabeled(prediction_id));
        }
        prediction.actual_label = Some(actual_label);
        prediction.feedback_received_at = Some(received_at);

        let feedback = FeedbackRecord {
            prediction_id,
            modality: prediction.modality,
            actual_label,
            outcome: Outcome::classify(prediction.decision, actual_label),
            note: note.to_string(),
            received_at,
        };
        inner.feedback.push(feedback.clone());
        Ok(feedback)
    }

    fn feedback_count_since(
        &self,
        modality: Modality,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, PersistenceError> {
        Ok(self
            .lock()?
            .feedback
            .iter()
            .filter(|f| f.modality == modality && since.map_or(true, |s| f.received_at > s))
            .count() as u64)
    }

    fn labeled_transactions(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, PersistenceError> {
        let inner = self.lock()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.predictions.get(id))
            .filter(|p| p.modality == modality)
            .filter_map(|p| {
                p.actual_label.map(|label| LabeledTransaction {
                    transaction: p.transaction.clone(),
                    label,
                })
            })
            .collect())
    }

    fn outcome_summary(&self, modality: Modality) -> Result<OutcomeSummary, PersistenceError> {
        let inner = self.lock()?;
        let mut summary = OutcomeSummary::default();
        for p in inner.predictions.values().filter(|p| p.modality == modality) {
            summary.total_predictions += 1;
            if let Some(actual) = p.actual_label {
                summary.record(Outcome::classify(p.decision, actual));
            }
        }
        Ok(summary)
    }

    fn insert_model_version(&self, version: &ModelVersion) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        if inner
            .versions
            .iter()
            .any(|v| v.id == version.id || v.version == version.version)
        {
            return Err(PersistenceError::Corrupt(format!(
                "model version {} already exists",
                version.version
            )));
        }
        inner.versions.push(version.clone());
        Ok(())
    }

    fn active_model_version(&self, modality: Modality) -> Result<Option<ModelVersion>, PersistenceError> {
        Ok(self
            .lock()?
            .versions
            .iter()
            .find(|v| v.modality == modality && v.is_active)
            .cloned())
    }

    fn model_versions(&self, modality: Modality) -> Result<Vec<ModelVersion>, PersistenceError> {
        let mut versions: Vec<ModelVersion> = self
            .lock()?
            .versions
            .iter()
            .filter(|v| v.modality == modality)
            .cloned()
            .collect();
        versions.reverse();
        Ok(versions)
    }

    fn activate_model_version(&self, modality: Modality, id: Uuid) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        // Validate before mutating so a failure leaves the previous active row intact
        if !inner.versions.iter().any(|v| v.id == id && v.modality == modality) {
            return Err(PersistenceError::ModelVersionNotFound(id));
        }
        for v in inner.versions.iter_mut().filter(|v| v.modality == modality) {
            if v.id == id {
                v.is_active = true;
                v.status = ModelStatus::Active;
            } else if v.is_active {
                v.is_active = false;
                v.status = ModelStatus::Archived;
            }
        }
        Ok(())
    }

    fn set_model_status(&self, id: Uuid, status: ModelStatus) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        let version = inner
            .versions
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(PersistenceError::ModelVersionNotFound(id))?;
        version.status = status;
        Ok(())
    }

    fn insert_retraining_run(&self, run: &RetrainingRun) -> Result<(), PersistenceError> {
        self.lock()?.runs.push(run.clone());
        Ok(())
    }

    fn last_retraining_run(&self, modality: Modality) -> Result<Option<RetrainingRun>, PersistenceError> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .filter(|r| r.modality == modality)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    fn retraining_runs(&self, modality: Modality, limit: usize) -> Result<Vec<RetrainingRun>, PersistenceError> {
        let mut runs: Vec<RetrainingRun> = self
            .lock()?
            .runs
            .iter()
            .filter(|r| r.modality == modality)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
