//! Deterministic feature derivation shared by scoring and retraining.
//!
//! Each modality derives a fixed, named catalog of features from a raw
//! transaction. The catalog is then re-projected onto whatever feature list
//! the active model declares: names the model does not know are dropped and
//! names it expects but the catalog did not compute are zero-filled.

pub mod banking;
pub mod card;

use crate::types::transaction::{Modality, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered feature list a model was trained on
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    /// Build a schema, rejecting empty lists and duplicate names.
    pub fn new(names: Vec<String>) -> Result<Self, String> {
        if names.is_empty() {
            return Err("feature schema is empty".to_string());
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(format!("duplicate feature name '{name}'"));
            }
        }
        Ok(Self { names, index })
    }

    /// The full derived catalog of a modality, in canonical order.
    pub fn catalog(modality: Modality) -> Self {
        let names = FeatureEngine::catalog(modality)
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Ordered (name, value) pairs in model-schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

/// Full named feature set computed from one raw record
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub modality: Modality,
    pub values: Vec<(&'static str, f64)>,
    /// The timestamp was missing or unparseable and the neutral bucket was used
    pub time_defaulted: bool,
}

impl DerivedFeatures {
    /// Collect a feature set; non-finite values are stored as 0.
    pub(crate) fn new(modality: Modality, values: Vec<(&'static str, f64)>, time_defaulted: bool) -> Self {
        let values = values
            .into_iter()
            .map(|(name, value)| (name, if value.is_finite() { value } else { 0.0 }))
            .collect();
        Self {
            modality,
            values,
            time_defaulted,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    /// Re-project onto a model schema: unknown names are dropped, missing ones become 0.
    pub fn project(&self, schema: &FeatureSchema) -> FeatureVector {
        let mut values = vec![0.0; schema.len()];
        for (name, value) in &self.values {
            if let Some(i) = schema.position(name) {
                values[i] = *value;
            }
        }
        FeatureVector {
            names: schema.names().to_vec(),
            values,
        }
    }
}

/// Pure feature derivation for every modality
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEngine;

impl FeatureEngine {
    pub fn new() -> Self {
        Self
    }

    /// Derive the complete named feature set of a record.
    pub fn derive(&self, record: &TransactionRecord) -> DerivedFeatures {
        match record {
            TransactionRecord::Banking(tx) => banking::derive(tx),
            TransactionRecord::CreditCard(tx) => card::derive(tx),
        }
    }

    /// Derive and re-project onto a model schema in one step.
    pub fn derive_for(&self, record: &TransactionRecord, schema: &FeatureSchema) -> FeatureVector {
        self.derive(record).project(schema)
    }

    /// Canonical feature names of a modality.
    pub fn catalog(modality: Modality) -> &'static [&'static str] {
        match modality {
            Modality::Banking => banking::FEATURE_NAMES,
            Modality::CreditCard => card::FEATURE_NAMES,
        }
    }

    /// Columns that get standardized before inference.
    pub fn continuous_columns(modality: Modality) -> &'static [&'static str] {
        match modality {
            Modality::Banking => banking::CONTINUOUS_FEATURES,
            Modality::CreditCard => card::CONTINUOUS_FEATURES,
        }
    }
}
