//! Feature attribution with guaranteed output.
//!
//! The primary method decomposes the ensemble margin along each tree's
//! decision path. If that fails the engine falls back to value times global
//! importance, and if that fails too it returns zero-score placeholders.
//! Every call yields exactly `min(top_n, feature_count)` entries.

use crate::features::FeatureVector;
use crate::models::ActiveModel;
use crate::types::{Contribution, Impact};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

/// How an attribution was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    DecisionPath,
    ImportanceWeighted,
    Unavailable,
}

impl AttributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMethod::DecisionPath => "decision_path",
            AttributionMethod::ImportanceWeighted => "importance_weighted",
            AttributionMethod::Unavailable => "unavailable",
        }
    }
}

/// Ranked contributions plus the method used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub contributions: Vec<Contribution>,
    pub method: AttributionMethod,
    /// The primary method failed and a fallback was used
    pub degraded: bool,
}

pub struct AttributionEngine {
    top_n: usize,
}

impl AttributionEngine {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Explain a score. Never fails.
    ///
    /// `features` carries the reported values, `model_input` the vector the
    /// model actually saw.
    pub fn explain(
        &self,
        features: &FeatureVector,
        model_input: &[f64],
        model: &ActiveModel,
        probability: f64,
    ) -> Attribution {
        let count = self.top_n.min(features.len());

        match self.decision_path(features, model_input, model, count) {
            Ok(contributions) => {
                return Attribution {
                    contributions,
                    method: AttributionMethod::DecisionPath,
                    degraded: false,
                }
            }
            Err(e) => warn!(error = %e, "Decision-path attribution failed, using importance fallback"),
        }

        match self.importance_weighted(features, model_input, model, probability, count) {
            Ok(contributions) => Attribution {
                contributions,
                method: AttributionMethod::ImportanceWeighted,
                degraded: true,
            },
            Err(e) => {
                warn!(error = %e, "Importance attribution failed, returning placeholders");
                Attribution {
                    contributions: placeholders(features, count),
                    method: AttributionMethod::Unavailable,
                    degraded: true,
                }
            }
        }
    }

    fn decision_path(
        &self,
        features: &FeatureVector,
        model_input: &[f64],
        model: &ActiveModel,
        count: usize,
    ) -> Result<Vec<Contribution>, String> {
        let contributions = model
            .model
            .contributions(model_input)
            .map_err(|e| e.to_string())?;
        check_len(contributions.values.len(), features.len())?;

        let scored = contributions
            .values
            .iter()
            .map(|&c| (c, direction(c)))
            .collect();
        Ok(rank(features, scored, count))
    }

    fn importance_weighted(
        &self,
        features: &FeatureVector,
        model_input: &[f64],
        model: &ActiveModel,
        probability: f64,
        count: usize,
    ) -> Result<Vec<Contribution>, String> {
        let importance = model.model.feature_importance().map_err(|e| e.to_string())?;
        check_len(importance.len(), features.len())?;
        check_len(model_input.len(), features.len())?;

        let scored = model_input
            .iter()
            .zip(&importance)
            .map(|(&value, &weight)| {
                let c = value * weight;
                // Signed products are read relative to the side of 0.5 the score fell on
                let impact = match probability.partial_cmp(&0.5) {
                    Some(Ordering::Greater) => direction(c),
                    Some(Ordering::Less) => direction(-c),
                    _ => Impact::Unknown,
                };
                (c, impact)
            })
            .collect();
        Ok(rank(features, scored, count))
    }
}

/// Sign of a score; zero and non-finite scores carry no direction.
fn direction(score: f64) -> Impact {
    if !score.is_finite() || score == 0.0 {
        Impact::Unknown
    } else if score > 0.0 {
        Impact::Increases
    } else {
        Impact::Decreases
    }
}

fn check_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("attribution has {actual} entries for {expected} features"))
    }
}

/// Top `count` entries by absolute score; ties keep schema order.
fn rank(features: &FeatureVector, scored: Vec<(f64, Impact)>, count: usize) -> Vec<Contribution> {
    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (scored[a].0.abs(), scored[b].0.abs());
        sb.partial_cmp(&sa).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });

    order
        .into_iter()
        .take(count)
        .map(|i| {
            let (signed_score, impact) = scored[i];
            let (signed_score, impact) = if signed_score.is_finite() {
                (signed_score, impact)
            } else {
                (0.0, Impact::Unknown)
            };
            Contribution {
                feature: features.names[i].clone(),
                value: features.values[i],
                signed_score,
                impact,
            }
        })
        .collect()
}

fn placeholders(features: &FeatureVector, count: usize) -> Vec<Contribution> {
    features
        .iter()
        .take(count)
        .map(|(name, value)| Contribution {
            feature: name.to_string(),
            value,
            signed_score: 0.0,
            impact: Impact::Unknown,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::features::FeatureSchema;
    use crate::models::test_support::{banking_model, model_version};
    use crate::models::{Contributions, FraudModel};
    use crate::types::Modality;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Model whose attribution paths can be forced to fail
    struct BrokenModel {
        n: usize,
        importance_fails: bool,
    }

    impl FraudModel for BrokenModel {
        fn n_features(&self) -> usize {
            self.n
        }

        fn predict_proba(&self, _x: &[f64]) -> Result<f64, ModelError> {
            Ok(0.9)
        }

        fn contributions(&self, _x: &[f64]) -> Result<Contributions, ModelError> {
            Err(ModelError::NonFinite)
        }

        fn feature_importance(&self) -> Result<Vec<f64>, ModelError> {
            if self.importance_fails {
                Err(ModelError::NonFinite)
            } else {
                Ok((0..self.n).map(|i| (i + 1) as f64).collect())
            }
        }
    }

    fn broken(n: usize, importance_fails: bool) -> ActiveModel {
        let names = (0..n).map(|i| format!("f{i}")).collect();
        ActiveModel::new(
            model_version(Modality::Banking, "broken", 0.5),
            FeatureSchema::new(names).unwrap(),
            None,
            Arc::new(BrokenModel { n, importance_fails }),
        )
        .unwrap()
    }

    fn vector(values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            names: (0..values.len()).map(|i| format!("f{i}")).collect(),
            values,
        }
    }

    #[test]
    fn test_decision_path_ranks_by_magnitude() {
        let model = banking_model();
        let mut values = vec![0.0; model.schema.len()];
        values[model.schema.position("very_far_txn").unwrap()] = 1.0;
        values[model.schema.position("new_card").unwrap()] = 1.0;
        let features = FeatureVector {
            names: model.schema.names().to_vec(),
            values: values.clone(),
        };

        let attribution = AttributionEngine::new(3).explain(&features, &values, &model, 0.97);
        assert_eq!(attribution.method, AttributionMethod::DecisionPath);
        assert!(!attribution.degraded);
        assert_eq!(attribution.contributions.len(), 3);

        let top: Vec<&str> = attribution.contributions[..2]
            .iter()
            .map(|c| c.feature.as_str())
            .collect();
        assert!(top.contains(&"very_far_txn"));
        assert!(top.contains(&"new_card"));
        assert!(attribution.contributions[..2]
            .iter()
            .all(|c| c.impact == Impact::Increases));
    }

    #[test]
    fn test_importance_fallback_impact_rule() {
        let model = broken(3, false);
        let features = vector(vec![1.0, -2.0, 0.5]);

        let attribution = AttributionEngine::new(5).explain(&features, &features.values, &model, 0.8);
        assert_eq!(attribution.method, AttributionMethod::ImportanceWeighted);
        assert!(attribution.degraded);
        assert_eq!(attribution.contributions.len(), 3);

        // scores: 1.0, -4.0, 1.5
        assert_eq!(attribution.contributions[0].feature, "f1");
        assert_eq!(attribution.contributions[0].impact, Impact::Decreases);
        assert_eq!(attribution.contributions[1].feature, "f2");
        assert_eq!(attribution.contributions[1].impact, Impact::Increases);

        let low = AttributionEngine::new(1).explain(&features, &features.values, &model, 0.2);
        assert_eq!(low.contributions[0].impact, Impact::Increases);
    }

    #[test]
    fn test_zero_scores_have_no_direction() {
        assert_eq!(direction(0.0), Impact::Unknown);
        assert_eq!(direction(-0.0), Impact::Unknown);
        assert_eq!(direction(f64::NAN), Impact::Unknown);
        assert_eq!(direction(0.3), Impact::Increases);
        assert_eq!(direction(-0.3), Impact::Decreases);

        let model = banking_model();
        let values = vec![0.0; model.schema.len()];
        let features = FeatureVector {
            names: model.schema.names().to_vec(),
            values: values.clone(),
        };
        let attribution = AttributionEngine::new(model.schema.len()).explain(&features, &values, &model, 0.1);
        for c in &attribution.contributions {
            if c.signed_score == 0.0 {
                assert_eq!(c.impact, Impact::Unknown, "{}", c.feature);
            }
        }

        let zero_input = broken(2, false);
        let features = vector(vec![0.0, 1.0]);
        let attribution = AttributionEngine::new(2).explain(&features, &features.values, &zero_input, 0.8);
        assert_eq!(attribution.contributions[1].feature, "f0");
        assert_eq!(attribution.contributions[1].impact, Impact::Unknown);
    }

    #[test]
    fn test_placeholders_when_everything_fails() {
        let model = broken(4, true);
        let features = vector(vec![1.0, 2.0, 3.0, 4.0]);

        let attribution = AttributionEngine::new(2).explain(&features, &features.values, &model, 0.8);
        assert_eq!(attribution.method, AttributionMethod::Unavailable);
        assert!(attribution.degraded);
        assert_eq!(attribution.contributions.len(), 2);
        assert!(attribution
            .contributions
            .iter()
            .all(|c| c.signed_score == 0.0 && c.impact == Impact::Unknown));
    }

    proptest! {
        #[test]
        fn prop_exact_entry_count(
            n in 1usize..12,
            top_n in 0usize..20,
            importance_fails in any::<bool>(),
            p in 0.0f64..=1.0,
        ) {
            let model = broken(n, importance_fails);
            let features = vector((0..n).map(|i| i as f64 - 3.0).collect());
            let attribution = AttributionEngine::new(top_n).explain(&features, &features.values, &model, p);
            prop_assert_eq!(attribution.contributions.len(), top_n.min(n));
            prop_assert!(attribution.degraded);
        }
    }
}
