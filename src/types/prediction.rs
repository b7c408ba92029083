//! Prediction audit records, ground-truth labels and feedback outcomes

use crate::features::FeatureVector;
use crate::types::risk::RiskTier;
use crate::types::transaction::{Modality, TransactionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Binary ground truth / decision label, serialized as 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    Legitimate,
    Fraud,
}

impl Label {
    pub fn from_bool(is_fraud: bool) -> Self {
        if is_fraud {
            Label::Fraud
        } else {
            Label::Legitimate
        }
    }

    pub fn is_fraud(&self) -> bool {
        matches!(self, Label::Fraud)
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> u8 {
        match label {
            Label::Legitimate => 0,
            Label::Fraud => 1,
        }
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Legitimate),
            1 => Ok(Label::Fraud),
            other => Err(format!("label must be 0 or 1, got {other}")),
        }
    }
}

/// Confusion-matrix cell for a labeled prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    TruePositive,
    TrueNegative,
    FalsePositive,
    FalseNegative,
}

impl Outcome {
    /// Compare the stored decision against the ground truth.
    pub fn classify(decision: Label, actual: Label) -> Self {
        match (decision, actual) {
            (Label::Fraud, Label::Fraud) => Outcome::TruePositive,
            (Label::Legitimate, Label::Legitimate) => Outcome::TrueNegative,
            (Label::Fraud, Label::Legitimate) => Outcome::FalsePositive,
            (Label::Legitimate, Label::Fraud) => Outcome::FalseNegative,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::TruePositive => "true_positive",
            Outcome::TrueNegative => "true_negative",
            Outcome::FalsePositive => "false_positive",
            Outcome::FalseNegative => "false_negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "true_positive" => Some(Outcome::TruePositive),
            "true_negative" => Some(Outcome::TrueNegative),
            "false_positive" => Some(Outcome::FalsePositive),
            "false_negative" => Some(Outcome::FalseNegative),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction a feature pushed the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Increases,
    Decreases,
    Unknown,
}

/// One ranked entry of a feature attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub value: f64,
    pub signed_score: f64,
    pub impact: Impact,
}

/// Where the narrative text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeSource {
    Provider,
    Template,
}

/// Audit row written for every scored transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub modality: Modality,
    pub transaction: TransactionRecord,
    pub features: FeatureVector,
    pub raw_probability: f64,
    pub probability: f64,
    pub decision: Label,
    pub risk_tier: RiskTier,
    pub threshold_used: f64,
    pub attribution: Vec<Contribution>,
    pub narrative: String,
    pub narrative_source: NarrativeSource,
    pub model_version_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub actual_label: Option<Label>,
    pub feedback_received_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    pub fn has_feedback(&self) -> bool {
        self.actual_label.is_some()
    }
}

/// Append-only ground-truth submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub prediction_id: Uuid,
    pub modality: Modality,
    pub actual_label: Label,
    pub outcome: Outcome,
    pub note: String,
    pub received_at: DateTime<Utc>,
}

/// A labeled transaction usable as a retraining sample
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTransaction {
    pub transaction: TransactionRecord,
    pub label: Label,
}

/// Confusion counts over labeled predictions of one modality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub total_predictions: u64,
    pub true_positives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl OutcomeSummary {
    pub fn record(&mut self, outcome: Outcome) {
        self.record_many(outcome, 1);
    }

    /// Add `count` labeled predictions with the same outcome.
    pub fn record_many(&mut self, outcome: Outcome, count: u64) {
        let bucket = match outcome {
            Outcome::TruePositive => &mut self.true_positives,
            Outcome::TrueNegative => &mut self.true_negatives,
            Outcome::FalsePositive => &mut self.false_positives,
            Outcome::FalseNegative => &mut self.false_negatives,
        };
        *bucket += count;
    }

    pub fn labeled(&self) -> u64 {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    pub fn feedback_rate(&self) -> f64 {
        ratio(self.labeled(), self.total_predictions)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
