//! Ground-truth feedback ingestion

use crate::error::FeedbackError;
use crate::metrics::PipelineMetrics;
use crate::retraining::RetrainingTrigger;
use crate::store::Store;
use crate::types::{FeedbackRecord, Label, Modality};
use chrono::Utc;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Records labels against past predictions and notifies the retraining trigger
pub struct FeedbackIngestor {
    store: Arc<dyn Store>,
    trigger: Arc<RetrainingTrigger>,
    metrics: Arc<PipelineMetrics>,
}

/// Parse a submitted label; only 0 and 1 are accepted.
pub fn parse_label(actual_label: i64) -> Result<Label, FeedbackError> {
    match actual_label {
        0 => Ok(Label::Legitimate),
        1 => Ok(Label::Fraud),
        other => Err(FeedbackError::InvalidLabel(other)),
    }
}

impl FeedbackIngestor {
    pub fn new(store: Arc<dyn Store>, trigger: Arc<RetrainingTrigger>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            store,
            trigger,
            metrics,
        }
    }

    /// Label a prediction once and classify the outcome.
    ///
    /// The label and the feedback row are written in one unit of work. The
    /// retraining check then runs on a spawned task; its failures are logged
    /// and never reach the caller.
    pub fn submit(
        &self,
        prediction_id: Uuid,
        actual_label: i64,
        note: Option<&str>,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let label = parse_label(actual_label)?;
        let record = self
            .store
            .record_feedback(prediction_id, label, note.unwrap_or_default(), Utc::now())?;

        self.metrics.record_feedback(record.outcome);
        info!(
            prediction_id = %prediction_id,
            modality = %record.modality,
            outcome = %record.outcome,
            "Feedback recorded"
        );

        self.notify(record.modality);
        Ok(record)
    }

    fn notify(&self, modality: Modality) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(modality = %modality, "No async runtime, retraining check skipped");
            return;
        };
        let trigger = self.trigger.clone();
        runtime.spawn(async move {
            match trigger.on_feedback(modality) {
                Ok(Some(_)) => info!(modality = %modality, "Retraining scheduled"),
                Ok(None) => debug!(modality = %modality, "No retraining scheduled"),
                Err(e) => warn!(modality = %modality, error = %e, "Retraining check failed"),
            }
        });
    }
}
