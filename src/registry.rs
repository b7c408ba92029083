//! Versioned model registry with atomic promotion.
//!
//! The registry owns one lock-free snapshot cell per modality. Scoring reads
//! the cell without blocking; promotion writes the store first (a single
//! deactivate-then-activate transaction) and only then swaps the cell, so the
//! in-process view never runs ahead of the persisted one.

use crate::error::RegistryError;
use crate::models::{ActiveModel, ArtifactStore, ModelArtifact};
use crate::store::Store;
use crate::types::{Modality, ModelMetrics, ModelStatus, ModelVersion};
use arc_swap::ArcSwapOption;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Tolerance applied to the promotion comparison
const PROMOTION_TOLERANCE: f64 = 1e-9;

/// Decides whether a candidate replaces the active model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionPolicy {
    /// Minimum F1 improvement over the active model
    pub epsilon: f64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self { epsilon: 0.01 }
    }
}

impl PromotionPolicy {
    /// Promote iff there is no active model or `candidate - active >= epsilon`.
    /// Returns the decision and the improvement when an active model exists.
    pub fn decide(&self, candidate_f1: f64, active_f1: Option<f64>) -> (bool, Option<f64>) {
        match active_f1 {
            None => (true, None),
            Some(active) => {
                let improvement = candidate_f1 - active;
                (improvement + PROMOTION_TOLERANCE >= self.epsilon, Some(improvement))
            }
        }
    }
}

/// A trained model awaiting the promotion decision
#[derive(Debug, Clone)]
pub struct Candidate {
    pub artifact: ModelArtifact,
    pub metrics: ModelMetrics,
}

/// Result of `promote_or_reject`
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    pub version: ModelVersion,
    pub promoted: bool,
    pub improvement: Option<f64>,
    pub previous: Option<ModelVersion>,
    pub backup: Option<String>,
}

struct Slot {
    active: ArcSwapOption<ActiveModel>,
    /// Serializes promotions of one modality
    promotion: Mutex<()>,
}

impl Slot {
    fn new() -> Self {
        Self {
            active: ArcSwapOption::empty(),
            promotion: Mutex::new(()),
        }
    }
}

pub struct ModelRegistry {
    store: Arc<dyn Store>,
    artifacts: Arc<dyn ArtifactStore>,
    policy: PromotionPolicy,
    banking: Slot,
    credit_card: Slot,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn Store>, artifacts: Arc<dyn ArtifactStore>, policy: PromotionPolicy) -> Self {
        Self {
            store,
            artifacts,
            policy,
            banking: Slot::new(),
            credit_card: Slot::new(),
        }
    }

    fn slot(&self, modality: Modality) -> &Slot {
        match modality {
            Modality::Banking => &self.banking,
            Modality::CreditCard => &self.credit_card,
        }
    }

    pub fn policy(&self) -> PromotionPolicy {
        self.policy
    }

    /// Snapshot of the active model; never blocks.
    pub fn active(&self, modality: Modality) -> Option<Arc<ActiveModel>> {
        self.slot(modality).active.load_full()
    }

    pub fn has_active(&self, modality: Modality) -> bool {
        self.slot(modality).active.load().is_some()
    }

    /// Versions of a modality, newest first.
    pub fn versions(&self, modality: Modality) -> Result<Vec<ModelVersion>, RegistryError> {
        Ok(self.store.model_versions(modality)?)
    }

    /// Load the persisted active model of every modality into memory.
    ///
    /// A modality whose artifact cannot be loaded stays without an active
    /// model; its error is logged and returned in the list.
    pub fn load_active(&self) -> Vec<(Modality, Result<Option<String>, RegistryError>)> {
        Modality::ALL
            .iter()
            .map(|&modality| {
                let result = self.load_one(modality);
                match &result {
                    Ok(Some(version)) => info!(modality = %modality, version = %version, "Active model loaded"),
                    Ok(None) => warn!(modality = %modality, "No active model registered"),
                    Err(e) => warn!(modality = %modality, error = %e, "Failed to load active model"),
                }
                (modality, result)
            })
            .collect()
    }

    fn load_one(&self, modality: Modality) -> Result<Option<String>, RegistryError> {
        let Some(version) = self.store.active_model_version(modality)? else {
            return Ok(None);
        };
        let artifact = self.artifacts.load(&version.artifact_ref)?;
        let label = version.version.clone();
        let model = ActiveModel::from_artifact(version, artifact)?;
        self.slot(modality).active.store(Some(Arc::new(model)));
        Ok(Some(label))
    }

    /// Register a candidate and promote it if it beats the active model.
    ///
    /// The candidate artifact is saved and its version row written either
    /// way. On promotion the previous artifact is backed up first; a failed
    /// backup aborts the promotion and leaves the active model untouched.
    pub fn promote_or_reject(&self, candidate: Candidate) -> Result<PromotionOutcome, RegistryError> {
        let modality = candidate.artifact.modality;
        let slot = self.slot(modality);
        let _guard = slot.promotion.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut version = ModelVersion {
            id: Uuid::new_v4(),
            version: candidate.artifact.version.clone(),
            modality,
            artifact_ref: String::new(),
            threshold: candidate.artifact.threshold,
            metrics: candidate.metrics.clone(),
            status: ModelStatus::Candidate,
            is_active: false,
            created_at: Utc::now(),
        };

        // Validate before anything is persisted
        let model = ActiveModel::from_artifact(version.clone(), candidate.artifact.clone())?;
        version.artifact_ref = self.artifacts.save(&candidate.artifact)?;
        version.status = ModelStatus::Evaluated;

        let previous = self.store.active_model_version(modality)?;
        let (promote, improvement) = self
            .policy
            .decide(version.metrics.f1, previous.as_ref().map(|v| v.metrics.f1));

        if !promote {
            version.status = ModelStatus::Rejected;
            self.store.insert_model_version(&version)?;
            info!(
                modality = %modality,
                version = %version.version,
                candidate_f1 = version.metrics.f1,
                improvement = ?improvement,
                epsilon = self.policy.epsilon,
                "Candidate rejected"
            );
            return Ok(PromotionOutcome {
                version,
                promoted: false,
                improvement,
                previous,
                backup: None,
            });
        }

        self.store.insert_model_version(&version)?;

        let backup = match &previous {
            Some(prev) => match self.artifacts.backup(&prev.artifact_ref) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(modality = %modality, error = %e, "Backup failed, promotion aborted");
                    self.store.set_model_status(version.id, ModelStatus::Rejected)?;
                    return Err(RegistryError::BackupFailed(e));
                }
            },
            None => None,
        };

        self.store.activate_model_version(modality, version.id)?;
        version.status = ModelStatus::Active;
        version.is_active = true;

        let model = ActiveModel {
            version: version.clone(),
            ..model
        };
        slot.active.store(Some(Arc::new(model)));

        info!(
            modality = %modality,
            version = %version.version,
            candidate_f1 = version.metrics.f1,
            improvement = ?improvement,
            previous = ?previous.as_ref().map(|v| v.version.as_str()),
            "Candidate promoted"
        );

        Ok(PromotionOutcome {
            version,
            promoted: true,
            improvement,
            previous,
            backup,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::FsArtifactStore;
    use crate::store::MemoryStore;

    /// Empty registry over a memory store and a temporary artifact directory.
    pub fn memory_registry() -> (ModelRegistry, tempfile::TempDir) {
        registry_over(Arc::new(MemoryStore::new()))
    }

    /// Empty registry over `store` and a temporary artifact directory.
    pub fn registry_over(store: Arc<dyn Store>) -> (ModelRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = FsArtifactStore::new(dir.path().join("models"), dir.path().join("backups"));
        let registry = ModelRegistry::new(store, Arc::new(artifacts), PromotionPolicy::default());
        (registry, dir)
    }
}
