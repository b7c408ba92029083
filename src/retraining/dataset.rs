//! Base training data and its alignment onto a feature schema

use crate::error::RetrainError;
use crate::features::{FeatureEngine, FeatureSchema};
use crate::types::{Label, LabeledTransaction, Modality, TransactionRecord};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Keys accepted as the ground-truth column of a base record
const LABEL_KEYS: [&str; 3] = ["label", "Class", "Fraud_Label"];

/// Supplier of labeled base samples per modality
pub trait DatasetSource: Send + Sync {
    fn load(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, RetrainError>;

    /// Whether any base data exists for the modality.
    fn has_data(&self, modality: Modality) -> bool;
}

/// Reads `{data_dir}/{modality}.jsonl`, one labeled raw record per line.
pub struct JsonlDatasetSource {
    data_dir: PathBuf,
}

impl JsonlDatasetSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path(&self, modality: Modality) -> PathBuf {
        self.data_dir.join(format!("{}.jsonl", modality.as_str()))
    }
}

fn parse_label(value: &Value) -> Option<Label> {
    let is_fraud = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => match n.as_f64()? {
            v if v == 0.0 => false,
            v if v == 1.0 => true,
            _ => return None,
        },
        Value::String(s) => match s.trim() {
            "0" | "false" => false,
            "1" | "true" => true,
            _ => return None,
        },
        _ => return None,
    };
    Some(Label::from_bool(is_fraud))
}

/// Parse one labeled line of a base dataset.
pub fn parse_sample(modality: Modality, line: &str) -> Result<LabeledTransaction, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let label = LABEL_KEYS
        .iter()
        .find_map(|k| value.get(*k))
        .ok_or_else(|| format!("no label column ({})", LABEL_KEYS.join("/")))?;
    let label = parse_label(label).ok_or_else(|| format!("label must be 0 or 1, got {label}"))?;
    let transaction = TransactionRecord::from_json(modality, &value).map_err(|e| e.to_string())?;
    Ok(LabeledTransaction { transaction, label })
}

impl DatasetSource for JsonlDatasetSource {
    fn has_data(&self, modality: Modality) -> bool {
        self.path(modality).is_file()
    }

    /// A missing file yields no samples. Malformed lines are skipped with a warning.
    fn load(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, RetrainError> {
        let path = self.path(modality);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No base dataset");
                return Ok(Vec::new());
            }
            Err(e) => return Err(RetrainError::Dataset(format!("{}: {e}", path.display()))),
        };

        let mut samples = Vec::new();
        let mut skipped = 0usize;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| RetrainError::Dataset(format!("{}: {e}", path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_sample(modality, &line) {
                Ok(sample) => samples.push(sample),
                Err(reason) => {
                    skipped += 1;
                    if skipped <= 5 {
                        warn!(path = %path.display(), line = lineno + 1, reason = %reason, "Skipping base sample");
                    }
                }
            }
        }

        if samples.is_empty() && skipped > 0 {
            return Err(RetrainError::Dataset(format!(
                "{}: none of {skipped} lines could be parsed",
                path.display()
            )));
        }
        debug!(path = %path.display(), samples = samples.len(), skipped, "Base dataset loaded");
        Ok(samples)
    }
}

/// Fixed in-memory samples
#[derive(Default)]
pub struct StaticDatasetSource {
    pub banking: Vec<LabeledTransaction>,
    pub credit_card: Vec<LabeledTransaction>,
}

impl DatasetSource for StaticDatasetSource {
    fn has_data(&self, modality: Modality) -> bool {
        match modality {
            Modality::Banking => !self.banking.is_empty(),
            Modality::CreditCard => !self.credit_card.is_empty(),
        }
    }

    fn load(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, RetrainError> {
        Ok(match modality {
            Modality::Banking => self.banking.clone(),
            Modality::CreditCard => self.credit_card.clone(),
        })
    }
}

/// Feature matrix aligned on one schema
#[derive(Debug, Clone)]
pub struct Dataset {
    pub schema: FeatureSchema,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl Dataset {
    pub fn empty(schema: FeatureSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Derive and project every sample onto the schema. Samples of another
    /// modality are rejected.
    pub fn extend(
        &mut self,
        engine: &FeatureEngine,
        modality: Modality,
        samples: &[LabeledTransaction],
    ) -> Result<usize, RetrainError> {
        for sample in samples {
            if sample.transaction.modality() != modality {
                return Err(RetrainError::Dataset(format!(
                    "{} sample in a {modality} dataset",
                    sample.transaction.modality()
                )));
            }
            let vector = engine.derive_for(&sample.transaction, &self.schema);
            self.rows.push(vector.values);
            self.labels.push(sample.label.is_fraud());
        }
        Ok(samples.len())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows and labels at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<bool>) {
        indices
            .iter()
            .map(|&i| (self.rows[i].clone(), self.labels[i]))
            .unzip()
    }
}
