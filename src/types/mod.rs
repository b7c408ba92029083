//! Type definitions shared across the scoring pipeline and model lifecycle

pub mod lifecycle;
pub mod prediction;
pub mod risk;
pub mod transaction;

pub use lifecycle::{
    ClassCounts, ModelMetrics, ModelStatus, ModelVersion, RetrainingRun, RunDecision,
    SampleComposition, TriggerReason,
};
pub use prediction::{
    Contribution, FeedbackRecord, Impact, Label, LabeledTransaction, NarrativeSource, Outcome,
    OutcomeSummary, PredictionRecord,
};
pub use risk::{RiskTier, RiskTierCutpoints};
pub use transaction::{BankingTransaction, CardTransaction, Modality, TransactionRecord};
