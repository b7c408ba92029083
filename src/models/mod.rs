//! Model artifacts, inference and explanation components

pub mod artifact;
pub mod attribution;
pub mod inference;
pub mod loader;
pub mod narrative;
pub mod rules;
pub mod standardizer;
pub mod tree;

use crate::error::{ArtifactError, ModelError};
use crate::features::{FeatureSchema, FeatureVector};
use crate::types::ModelVersion;
use std::fmt;
use std::sync::Arc;

pub use artifact::ModelArtifact;
pub use attribution::{Attribution, AttributionEngine, AttributionMethod};
pub use inference::{ScoreResult, ScoringEngine};
pub use loader::{ArtifactStore, FsArtifactStore};
pub use narrative::{NarrativeProvider, NarrativeRequest, TemplateNarrator};
pub use rules::{DampenerChain, DampenerRule};
pub use standardizer::Standardizer;
pub use tree::TreeEnsemble;

/// Per-feature additive decomposition of a model margin
#[derive(Debug, Clone, PartialEq)]
pub struct Contributions {
    /// Expected margin before any feature is considered
    pub bias: f64,
    pub values: Vec<f64>,
}

/// A binary fraud classifier over a fixed-width feature vector
pub trait FraudModel: Send + Sync {
    fn n_features(&self) -> usize;

    /// Probability of the fraud class.
    fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError>;

    /// Exact decision-path contributions in margin space.
    fn contributions(&self, x: &[f64]) -> Result<Contributions, ModelError>;

    /// Global importance per feature, normalized to sum to 1 when non-zero.
    fn feature_importance(&self) -> Result<Vec<f64>, ModelError>;
}

/// The model currently serving a modality, with everything needed to score
pub struct ActiveModel {
    pub version: ModelVersion,
    pub schema: FeatureSchema,
    pub standardizer: Option<Standardizer>,
    pub model: Arc<dyn FraudModel>,
}

impl fmt::Debug for ActiveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveModel")
            .field("version", &self.version.version)
            .field("modality", &self.version.modality)
            .field("features", &self.schema.len())
            .field("standardized", &self.standardizer.is_some())
            .finish()
    }
}

impl ActiveModel {
    /// Assemble an active model, checking the schema against the model width.
    pub fn new(
        version: ModelVersion,
        schema: FeatureSchema,
        mut standardizer: Option<Standardizer>,
        model: Arc<dyn FraudModel>,
    ) -> Result<Self, ArtifactError> {
        if model.n_features() != schema.len() {
            return Err(ArtifactError::Invalid(format!(
                "schema declares {} features, model expects {}",
                schema.len(),
                model.n_features()
            )));
        }
        if let Some(scaler) = standardizer.as_mut() {
            scaler.bind(&schema).map_err(ArtifactError::Invalid)?;
        }
        Ok(Self {
            version,
            schema,
            standardizer,
            model,
        })
    }

    /// Validate an artifact loaded from storage and wrap it for serving.
    pub fn from_artifact(version: ModelVersion, artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        if artifact.modality != version.modality {
            return Err(ArtifactError::Invalid(format!(
                "artifact modality {} does not match version modality {}",
                artifact.modality, version.modality
            )));
        }
        let schema = FeatureSchema::new(artifact.feature_names).map_err(ArtifactError::Invalid)?;
        let mut ensemble = artifact.ensemble;
        ensemble
            .prepare()
            .map_err(|e| ArtifactError::Invalid(e.to_string()))?;
        Self::new(version, schema, artifact.standardizer, Arc::new(ensemble))
    }

    /// Model input for a feature vector: a copy with the standardizer applied.
    pub fn model_input(&self, features: &FeatureVector) -> Vec<f64> {
        let mut input = features.values.clone();
        if let Some(scaler) = &self.standardizer {
            scaler.transform(&mut input);
        }
        input
    }
}
