//! Model versions and retraining audit records

use crate::types::transaction::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Held-out evaluation snapshot of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Area under the ROC curve
    pub roc_auc: f64,
}

/// Registry status of a model version.
///
/// `Candidate` until its artifact validates with held-out metrics attached,
/// then `Evaluated`, then either `Active` or `Rejected`. A replaced active
/// version becomes `Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Candidate,
    Evaluated,
    Active,
    Archived,
    Rejected,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Candidate => "candidate",
            ModelStatus::Evaluated => "evaluated",
            ModelStatus::Active => "active",
            ModelStatus::Archived => "archived",
            ModelStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(ModelStatus::Candidate),
            "evaluated" => Some(ModelStatus::Evaluated),
            "active" => Some(ModelStatus::Active),
            "archived" => Some(ModelStatus::Archived),
            "rejected" => Some(ModelStatus::Rejected),
            _ => None,
        }
    }
}

/// A trained model artifact registered for a modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    /// Human-readable label, e.g. `banking_retrained_20240301_101500_ab12cd34`
    pub version: String,
    pub modality: Modality,
    pub artifact_ref: String,
    pub threshold: f64,
    pub metrics: ModelMetrics,
    pub status: ModelStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a retraining run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerReason {
    /// Accumulated feedback crossed the configured threshold
    FeedbackThreshold { feedback_count: u64 },
    /// Operator requested a run
    Manual,
    /// No active model existed at start-up
    Bootstrap,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::FeedbackThreshold { feedback_count } => {
                write!(f, "feedback_threshold({feedback_count})")
            }
            TriggerReason::Manual => f.write_str("manual"),
            TriggerReason::Bootstrap => f.write_str("bootstrap"),
        }
    }
}

/// Class counts of one data partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub fraud: usize,
    pub legitimate: usize,
}

impl ClassCounts {
    pub fn from_labels(labels: &[bool]) -> Self {
        let fraud = labels.iter().filter(|&&l| l).count();
        Self {
            fraud,
            legitimate: labels.len() - fraud,
        }
    }

    pub fn total(&self) -> usize {
        self.fraud + self.legitimate
    }
}

/// Sample composition of a retraining run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleComposition {
    pub base_samples: usize,
    pub feedback_samples: usize,
    pub train_before_rebalance: ClassCounts,
    pub train_after_rebalance: ClassCounts,
    pub held_out: ClassCounts,
}

/// Final state of a retraining run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum RunDecision {
    Promoted,
    Rejected,
    Aborted { reason: String },
}

impl RunDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RunDecision::Promoted => "promoted",
            RunDecision::Rejected => "rejected",
            RunDecision::Aborted { .. } => "aborted",
        }
    }
}

/// Append-only audit row for one retraining attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainingRun {
    pub id: Uuid,
    pub modality: Modality,
    pub trigger_reason: TriggerReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub composition: SampleComposition,
    pub candidate_metrics: Option<ModelMetrics>,
    pub selected_threshold: Option<f64>,
    pub candidate_version_id: Option<Uuid>,
    /// Candidate F1 minus active F1, when an active model existed
    pub f1_improvement: Option<f64>,
    pub decision: RunDecision,
}

impl RetrainingRun {
    /// Audit row for a run that stopped before producing a candidate.
    pub fn aborted(
        modality: Modality,
        trigger_reason: TriggerReason,
        started_at: DateTime<Utc>,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            modality,
            trigger_reason,
            started_at,
            finished_at: Utc::now(),
            composition: SampleComposition::default(),
            candidate_metrics: None,
            selected_threshold: None,
            candidate_version_id: None,
            f1_improvement: None,
            decision: RunDecision::Aborted { reason },
        }
    }
}
