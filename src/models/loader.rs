//! Filesystem storage for model artifacts

use super::artifact::ModelArtifact;
use crate::error::ArtifactError;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact storage keyed by (modality, version)
pub trait ArtifactStore: Send + Sync {
    /// Persist a new artifact and return its reference. Never overwrites.
    fn save(&self, artifact: &ModelArtifact) -> Result<String, ArtifactError>;

    /// Load an artifact by reference.
    fn load(&self, artifact_ref: &str) -> Result<ModelArtifact, ArtifactError>;

    /// Copy an artifact to a timestamp-keyed backup location and return it.
    fn backup(&self, artifact_ref: &str) -> Result<String, ArtifactError>;
}

/// JSON artifacts under `{models_dir}/{modality}/{version}.json`
pub struct FsArtifactStore {
    models_dir: PathBuf,
    backup_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at the given directories
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(models_dir: P, backup_dir: Q) -> Self {
        Self {
            models_dir: models_dir.as_ref().to_path_buf(),
            backup_dir: backup_dir.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, artifact_ref: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(artifact_ref);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ArtifactError::Invalid(format!(
                "artifact reference '{artifact_ref}' escapes the models directory"
            )));
        }
        Ok(self.models_dir.join(relative))
    }

    fn io_error(path: &Path, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(&self, artifact: &ModelArtifact) -> Result<String, ArtifactError> {
        let artifact_ref = format!("{}/{}", artifact.modality, artifact.file_name());
        let path = self.resolve(&artifact_ref)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Self::io_error(dir, e))?;
        }

        let bytes = serde_json::to_vec_pretty(artifact)
            .map_err(|e| ArtifactError::Decode(artifact_ref.clone(), e))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ArtifactError::AlreadyExists(artifact_ref.clone()),
                _ => Self::io_error(&path, e),
            })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| Self::io_error(&path, e))?;

        info!(artifact = %artifact_ref, bytes = bytes.len(), "Model artifact saved");
        Ok(artifact_ref)
    }

    fn load(&self, artifact_ref: &str) -> Result<ModelArtifact, ArtifactError> {
        let path = self.resolve(artifact_ref)?;
        let bytes = fs::read(&path).map_err(|e| Self::io_error(&path, e))?;
        let artifact = serde_json::from_slice(&bytes)
            .map_err(|e| ArtifactError::Decode(artifact_ref.to_string(), e))?;
        debug!(artifact = %artifact_ref, "Model artifact loaded");
        Ok(artifact)
    }

    fn backup(&self, artifact_ref: &str) -> Result<String, ArtifactError> {
        let source = self.resolve(artifact_ref)?;
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArtifactError::Invalid(format!("artifact reference '{artifact_ref}' has no file name")))?;

        fs::create_dir_all(&self.backup_dir).map_err(|e| Self::io_error(&self.backup_dir, e))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let target = self.backup_dir.join(format!("backup_{stamp}_{file_name}"));
        fs::copy(&source, &target).map_err(|e| Self::io_error(&source, e))?;

        info!(
            artifact = %artifact_ref,
            backup = %target.display(),
            "Model artifact backed up"
        );
        Ok(target.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::banking_artifact;

    fn store(dir: &tempfile::TempDir) -> FsArtifactStore {
        FsArtifactStore::new(dir.path().join("models"), dir.path().join("backups"))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let artifact = banking_artifact("banking_v1");

        let artifact_ref = store.save(&artifact).unwrap();
        assert_eq!(artifact_ref, "banking/banking_v1.json");

        let mut loaded = store.load(&artifact_ref).unwrap();
        loaded.ensemble.prepare().unwrap();
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(loaded.threshold, artifact.threshold);
    }

    #[test]
    fn test_save_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let artifact = banking_artifact("banking_v1");

        store.save(&artifact).unwrap();
        assert!(matches!(store.save(&artifact), Err(ArtifactError::AlreadyExists(_))));
    }

    #[test]
    fn test_backup_copies_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let artifact_ref = store.save(&banking_artifact("banking_v1")).unwrap();

        let backup = store.backup(&artifact_ref).unwrap();
        let backup_path = Path::new(&backup);
        assert!(backup_path.exists());
        let name = backup_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("backup_"));
        assert!(name.ends_with("_banking_v1.json"));
    }

    #[test]
    fn test_missing_artifact_and_escape_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(matches!(store.load("banking/nope.json"), Err(ArtifactError::Io { .. })));
        assert!(matches!(store.load("../secrets.json"), Err(ArtifactError::Invalid(_))));
        assert!(store.backup("banking/nope.json").is_err());
    }
}
