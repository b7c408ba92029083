//! Serialized form of a trained model

use super::standardizer::Standardizer;
use super::tree::TreeEnsemble;
use crate::types::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to rebuild a model: schema, scaler, trees and threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub modality: Modality,
    pub version: String,
    /// Ordered input schema of the ensemble
    pub feature_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standardizer: Option<Standardizer>,
    pub ensemble: TreeEnsemble,
    /// Decision threshold selected on the held-out partition
    pub threshold: f64,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// File name of the artifact inside its modality directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.version)
    }
}
