//! One retraining run: merge, rebalance, train, evaluate, hand to the registry

use super::booster::GradientBooster;
use super::dataset::{Dataset, DatasetSource};
use super::evaluate::{best_threshold, evaluate};
use super::sampling::{smote, stratified_split, undersample};
use super::CancellationToken;
use crate::config::RetrainingConfig;
use crate::error::{ModelError, RetrainError};
use crate::features::{FeatureEngine, FeatureSchema};
use crate::models::{FraudModel, ModelArtifact, Standardizer};
use crate::registry::{Candidate, ModelRegistry};
use crate::store::Store;
use crate::types::{
    ClassCounts, Modality, ModelMetrics, RetrainingRun, RunDecision, SampleComposition, TriggerReason,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executes retraining runs and records their audit rows
pub struct RetrainingRunner {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn Store>,
    source: Arc<dyn DatasetSource>,
    engine: FeatureEngine,
    config: RetrainingConfig,
}

/// Label of a retrained version, e.g. `banking_retrained_20240301_101500_ab12cd34`
pub fn version_label(modality: Modality, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_retrained_{}_{}",
        modality.as_str(),
        at.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

struct Trained {
    artifact: ModelArtifact,
    metrics: ModelMetrics,
}

impl RetrainingRunner {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn Store>,
        source: Arc<dyn DatasetSource>,
        config: RetrainingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            source,
            engine: FeatureEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &RetrainingConfig {
        &self.config
    }

    /// Run one retraining attempt for `modality`.
    ///
    /// Every attempt leaves an audit row. Runs that end in a promotion or
    /// rejection return it; aborted runs are recorded and then returned as
    /// the error that stopped them.
    pub fn run(
        &self,
        modality: Modality,
        trigger: TriggerReason,
        cancel: &CancellationToken,
    ) -> Result<RetrainingRun, RetrainError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut composition = SampleComposition::default();
        info!(modality = %modality, trigger = %trigger, "Retraining run started");

        let trained = match self.train(modality, trigger, cancel, &mut composition) {
            Ok(trained) => trained,
            Err(e) => {
                self.record_abort(modality, trigger, started_at, composition, &e);
                return Err(e);
            }
        };

        let threshold = trained.artifact.threshold;
        let metrics = trained.metrics.clone();
        let outcome = match self.registry.promote_or_reject(Candidate {
            artifact: trained.artifact,
            metrics: trained.metrics,
        }) {
            Ok(outcome) => outcome,
            Err(e) => {
                let e = RetrainError::from(e);
                self.record_abort(modality, trigger, started_at, composition, &e);
                return Err(e);
            }
        };

        let run = RetrainingRun {
            id: Uuid::new_v4(),
            modality,
            trigger_reason: trigger,
            started_at,
            finished_at: Utc::now(),
            composition,
            candidate_metrics: Some(metrics),
            selected_threshold: Some(threshold),
            candidate_version_id: Some(outcome.version.id),
            f1_improvement: outcome.improvement,
            decision: if outcome.promoted {
                RunDecision::Promoted
            } else {
                RunDecision::Rejected
            },
        };
        self.store.insert_retraining_run(&run)?;

        info!(
            modality = %modality,
            version = %outcome.version.version,
            decision = run.decision.label(),
            f1 = outcome.version.metrics.f1,
            improvement = ?outcome.improvement,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Retraining run finished"
        );
        Ok(run)
    }

    fn record_abort(
        &self,
        modality: Modality,
        trigger: TriggerReason,
        started_at: DateTime<Utc>,
        composition: SampleComposition,
        cause: &RetrainError,
    ) {
        if cause.is_abort() {
            warn!(modality = %modality, reason = %cause, "Retraining run aborted");
        } else {
            error!(modality = %modality, error = %cause, "Retraining run failed");
        }
        let run = RetrainingRun {
            composition,
            ..RetrainingRun::aborted(modality, trigger, started_at, cause.to_string())
        };
        if let Err(e) = self.store.insert_retraining_run(&run) {
            error!(modality = %modality, error = %e, "Failed to record aborted retraining run");
        }
    }

    fn train(
        &self,
        modality: Modality,
        trigger: TriggerReason,
        cancel: &CancellationToken,
        composition: &mut SampleComposition,
    ) -> Result<Trained, RetrainError> {
        let cfg = &self.config;
        cancel.check()?;

        let base = self.source.load(modality)?;
        let feedback = self.store.labeled_transactions(modality)?;
        composition.base_samples = base.len();
        composition.feedback_samples = feedback.len();

        let bootstrap = trigger == TriggerReason::Bootstrap || !self.registry.has_active(modality);
        if !bootstrap && feedback.len() < cfg.min_feedback_samples {
            return Err(RetrainError::InsufficientData(format!(
                "{} feedback samples, need {}",
                feedback.len(),
                cfg.min_feedback_samples
            )));
        }

        let schema = FeatureSchema::catalog(modality);
        let mut dataset = Dataset::empty(schema.clone());
        dataset.extend(&self.engine, modality, &base)?;
        dataset.extend(&self.engine, modality, &feedback)?;

        let counts = ClassCounts::from_labels(&dataset.labels);
        let min_class = cfg.min_class_samples.max(2);
        if counts.fraud < min_class || counts.legitimate < min_class {
            return Err(RetrainError::InsufficientData(format!(
                "{} fraud and {} legitimate samples, need {min_class} of each",
                counts.fraud, counts.legitimate
            )));
        }
        cancel.check()?;

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let (train_idx, test_idx) = stratified_split(&dataset.labels, cfg.test_size, &mut rng);
        let (mut train_x, mut train_y) = dataset.take(&train_idx);
        let (mut test_x, test_y) = dataset.take(&test_idx);
        composition.held_out = ClassCounts::from_labels(&test_y);
        composition.train_before_rebalance = ClassCounts::from_labels(&train_y);

        smote(&mut train_x, &mut train_y, cfg.oversample_ratio, cfg.smote_k, &mut rng);
        let (mut train_x, train_y) = undersample(train_x, train_y, cfg.undersample_ratio, &mut rng);
        composition.train_after_rebalance = ClassCounts::from_labels(&train_y);
        cancel.check()?;

        let standardizer = Standardizer::fit(&train_x, &schema, FeatureEngine::continuous_columns(modality));
        standardizer.transform_rows(&mut train_x);
        standardizer.transform_rows(&mut test_x);

        let ensemble = GradientBooster::new(cfg.booster.clone(), cfg.seed).fit(&train_x, &train_y, cancel)?;
        cancel.check()?;

        let probabilities = test_x
            .iter()
            .map(|row| ensemble.predict_proba(row))
            .collect::<Result<Vec<f64>, ModelError>>()
            .map_err(|e| RetrainError::Training(e.to_string()))?;
        let (threshold, _) = best_threshold(&probabilities, &test_y, &cfg.threshold_grid)
            .ok_or_else(|| RetrainError::Training("empty threshold grid".to_string()))?;
        let metrics = evaluate(&probabilities, &test_y, threshold);

        info!(
            modality = %modality,
            train = train_y.len(),
            held_out = test_y.len(),
            threshold,
            f1 = metrics.f1,
            roc_auc = metrics.roc_auc,
            "Candidate evaluated"
        );
        cancel.check()?;

        let trained_at = Utc::now();
        let artifact = ModelArtifact {
            modality,
            version: version_label(modality, trained_at),
            feature_names: schema.names().to_vec(),
            standardizer: Some(standardizer),
            ensemble,
            threshold,
            trained_at,
        };
        Ok(Trained { artifact, metrics })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::registry::test_support::registry_over;
    use crate::retraining::dataset::StaticDatasetSource;
    use crate::store::MemoryStore;
    use crate::types::{BankingTransaction, Label, LabeledTransaction};

    fn runner(source: StaticDatasetSource, config: RetrainingConfig) -> (RetrainingRunner, Arc<MemoryStore>, tempfile::TempDir) {
        let store = Arc::new(MemoryStore::new());
        let (registry, dir) = registry_over(store.clone());
        let runner = RetrainingRunner::new(Arc::new(registry), store.clone(), Arc::new(source), config);
        (runner, store, dir)
    }

    #[test]
    fn test_bootstrap_run_promotes_first_model() {
        let (runner, store, _dir) = runner(banking_source(), quick_config());
        let run = runner
            .run(Modality::Banking, TriggerReason::Bootstrap, &CancellationToken::new())
            .unwrap();

        assert_eq!(run.decision, RunDecision::Promoted);
        assert!(run.f1_improvement.is_none());
        assert_eq!(run.composition.base_samples, 200);
        assert_eq!(run.composition.held_out, ClassCounts { fraud: 8, legitimate: 32 });
        let after = run.composition.train_after_rebalance;
        assert!(after.fraud as f64 / after.legitimate as f64 >= 0.7 - 1e-9);

        let metrics = run.candidate_metrics.as_ref().unwrap();
        assert!(metrics.f1 > 0.9);
        assert!(metrics.roc_auc > 0.9);

        let active = runner.registry.active(Modality::Banking).unwrap();
        assert_eq!(Some(active.version.id), run.candidate_version_id);
        assert!(active.version.version.starts_with("banking_retrained_"));
        assert!(active.standardizer.is_some());
        assert_eq!(store.last_retraining_run(Modality::Banking).unwrap(), Some(run));
    }

    #[test]
    fn test_overdrawn_accounts_do_not_poison_training() {
        let mut source = banking_source();
        source.banking.extend((0..20).map(|i| {
            let amount = 10.0 * (i + 1) as f64;
            LabeledTransaction {
                transaction: BankingTransaction::new(amount, -amount - 1.0).into(),
                label: if i % 4 == 0 { Label::Fraud } else { Label::Legitimate },
            }
        }));
        let (runner, _store, _dir) = runner(source, quick_config());
        let run = runner
            .run(Modality::Banking, TriggerReason::Bootstrap, &CancellationToken::new())
            .unwrap();

        assert_eq!(run.decision, RunDecision::Promoted);
        let active = runner.registry.active(Modality::Banking).unwrap();
        let scaler = active.standardizer.as_ref().unwrap();
        assert!(scaler.means.iter().chain(&scaler.scales).all(|v| v.is_finite()));
    }

    #[test]
    fn test_equal_candidate_is_rejected() {
        let mut config = quick_config();
        config.min_feedback_samples = 0;
        let (runner, _store, _dir) = runner(banking_source(), config);
        let token = CancellationToken::new();

        let first = runner.run(Modality::Banking, TriggerReason::Bootstrap, &token).unwrap();
        let second = runner.run(Modality::Banking, TriggerReason::Manual, &token).unwrap();

        assert_eq!(second.decision, RunDecision::Rejected);
        assert!(second.f1_improvement.unwrap().abs() < 1e-9);
        let active = runner.registry.active(Modality::Banking).unwrap();
        assert_eq!(Some(active.version.id), first.candidate_version_id);
        assert_eq!(runner.registry.versions(Modality::Banking).unwrap().len(), 2);
    }

    #[test]
    fn test_insufficient_feedback_aborts() {
        let (runner, store, _dir) = runner(banking_source(), quick_config());
        let token = CancellationToken::new();
        runner.run(Modality::Banking, TriggerReason::Bootstrap, &token).unwrap();

        let err = runner.run(Modality::Banking, TriggerReason::Manual, &token).unwrap_err();
        assert!(matches!(err, RetrainError::InsufficientData(_)));

        let last = store.last_retraining_run(Modality::Banking).unwrap().unwrap();
        assert_eq!(last.decision.label(), "aborted");
        assert_eq!(last.composition.base_samples, 200);
        assert_eq!(last.trigger_reason, TriggerReason::Manual);
    }

    #[test]
    fn test_single_class_data_aborts() {
        let source = StaticDatasetSource {
            banking: banking_samples(0, 50),
            credit_card: Vec::new(),
        };
        let (runner, _store, _dir) = runner(source, quick_config());
        let err = runner
            .run(Modality::Banking, TriggerReason::Bootstrap, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RetrainError::InsufficientData(_)));
        assert!(!runner.registry.has_active(Modality::Banking));
    }

    #[test]
    fn test_cancelled_run_is_recorded() {
        let (runner, store, _dir) = runner(banking_source(), quick_config());
        let token = CancellationToken::new();
        token.cancel();

        let err = runner.run(Modality::Banking, TriggerReason::Bootstrap, &token).unwrap_err();
        assert!(matches!(err, RetrainError::Cancelled));
        let runs = store.retraining_runs(Modality::Banking, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(matches!(runs[0].decision, RunDecision::Aborted { .. }));
    }

    #[test]
    fn test_version_label_format() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:15:00Z").unwrap().with_timezone(&Utc);
        let label = version_label(Modality::CreditCard, at);
        assert!(label.starts_with("credit_card_retrained_20240301_101500_"));
        assert_eq!(label.len(), "credit_card_retrained_20240301_101500_".len() + 8);
    }
}
