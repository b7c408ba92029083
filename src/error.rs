//! Error types for scoring, feedback, retraining and persistence

use crate::types::transaction::Modality;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the persistence collaborator
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("prediction {0} not found")]
    PredictionNotFound(Uuid),

    #[error("prediction {0} already has a ground-truth label")]
    AlreadyLabeled(Uuid),

    #[error("model version {0} not found")]
    ModelVersionNotFound(Uuid),
}

/// Failures reading or writing model artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {0} is not valid JSON: {1}")]
    Decode(String, #[source] serde_json::Error),

    #[error("artifact {0} already exists")]
    AlreadyExists(String),

    #[error("invalid artifact: {0}")]
    Invalid(String),
}

/// Failures of a loaded model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("feature vector has {actual} values, model expects {expected}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("tree {tree} is malformed: {reason}")]
    MalformedTree { tree: usize, reason: String },

    #[error("model produced a non-finite score")]
    NonFinite,
}

/// Failures of the scoring path; every variant prevents a probability
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid transaction: {0}")]
    InputValidation(String),

    #[error("no active model for modality {0}")]
    ModelUnavailable(Modality),

    #[error("inference failed: {0}")]
    Inference(#[from] ModelError),
}

/// Failures of the narrative collaborator
#[derive(Debug, Error)]
pub enum ExplanationProviderError {
    #[error("narrative provider unavailable: {0}")]
    Unavailable(String),

    #[error("narrative provider returned an empty response")]
    Empty,
}

/// Failures of feedback submission
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("actual_label must be 0 or 1, got {0}")]
    InvalidLabel(i64),

    #[error("prediction {0} not found")]
    PredictionNotFound(Uuid),

    #[error("prediction {0} already has feedback")]
    AlreadyLabeled(Uuid),

    #[error("persistence failure: {0}")]
    Persistence(PersistenceError),
}

impl From<PersistenceError> for FeedbackError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::PredictionNotFound(id) => FeedbackError::PredictionNotFound(id),
            PersistenceError::AlreadyLabeled(id) => FeedbackError::AlreadyLabeled(id),
            other => FeedbackError::Persistence(other),
        }
    }
}

/// Failures of model registration and promotion
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("artifact backup failed, promotion aborted: {0}")]
    BackupFailed(ArtifactError),

    #[error("candidate modality {candidate} does not match registry modality {expected}")]
    ModalityMismatch { expected: Modality, candidate: Modality },
}

/// Failures of a retraining run or its scheduling
#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("retraining cancelled")]
    Cancelled,

    #[error("retraining timed out after {0}s")]
    TimedOut(u64),

    #[error("a retraining run is already in flight for {0}")]
    AlreadyRunning(Modality),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl RetrainError {
    /// Whether the run stopped before a candidate was evaluated.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            RetrainError::InsufficientData(_)
                | RetrainError::Cancelled
                | RetrainError::TimedOut(_)
                | RetrainError::Dataset(_)
                | RetrainError::Training(_)
        )
    }
}
