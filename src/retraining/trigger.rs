//! Feedback-volume trigger with a per-modality single-flight guard.
//!
//! Runs execute on the blocking pool under a timeout. On expiry the run's
//! cancellation token is set, and the in-flight flag is only released once the
//! worker has returned, so two runs of one modality never overlap.

use super::run::RetrainingRunner;
use super::CancellationToken;
use crate::error::{PersistenceError, RetrainError};
use crate::metrics::PipelineMetrics;
use crate::store::Store;
use crate::types::{Modality, RetrainingRun, TriggerReason};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of retraining work executed on the blocking pool
pub trait RetrainJob: Send + Sync + 'static {
    fn run(
        &self,
        modality: Modality,
        trigger: TriggerReason,
        cancel: &CancellationToken,
    ) -> Result<RetrainingRun, RetrainError>;
}

impl RetrainJob for RetrainingRunner {
    fn run(
        &self,
        modality: Modality,
        trigger: TriggerReason,
        cancel: &CancellationToken,
    ) -> Result<RetrainingRun, RetrainError> {
        RetrainingRunner::run(self, modality, trigger, cancel)
    }
}

/// Observable retraining state of one modality
#[derive(Debug, Clone, Serialize)]
pub struct RetrainingStatus {
    pub modality: Modality,
    /// Feedback received since the last run started
    pub feedback_count: u64,
    pub threshold: u64,
    pub currently_retraining: bool,
    pub last_run: Option<RetrainingRun>,
}

pub type RunHandle = JoinHandle<Result<RetrainingRun, RetrainError>>;

/// Clears the in-flight flag when the supervising task ends
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RetrainingTrigger {
    job: Arc<dyn RetrainJob>,
    store: Arc<dyn Store>,
    metrics: Arc<PipelineMetrics>,
    threshold: u64,
    timeout: Duration,
    banking: Arc<AtomicBool>,
    credit_card: Arc<AtomicBool>,
}

impl RetrainingTrigger {
    pub fn new(
        job: Arc<dyn RetrainJob>,
        store: Arc<dyn Store>,
        metrics: Arc<PipelineMetrics>,
        threshold: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            job,
            store,
            metrics,
            threshold,
            timeout,
            banking: Arc::new(AtomicBool::new(false)),
            credit_card: Arc::new(AtomicBool::new(false)),
        }
    }

    fn flag(&self, modality: Modality) -> &Arc<AtomicBool> {
        match modality {
            Modality::Banking => &self.banking,
            Modality::CreditCard => &self.credit_card,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn is_running(&self, modality: Modality) -> bool {
        self.flag(modality).load(Ordering::Acquire)
    }

    /// Feedback rows received since the most recent run of any outcome started.
    pub fn feedback_since_last_run(&self, modality: Modality) -> Result<u64, PersistenceError> {
        let since = self.store.last_retraining_run(modality)?.map(|r| r.started_at);
        self.store.feedback_count_since(modality, since)
    }

    pub fn status(&self, modality: Modality) -> Result<RetrainingStatus, PersistenceError> {
        Ok(RetrainingStatus {
            modality,
            feedback_count: self.feedback_since_last_run(modality)?,
            threshold: self.threshold,
            currently_retraining: self.is_running(modality),
            last_run: self.store.last_retraining_run(modality)?,
        })
    }

    /// Check feedback volume after a feedback write and schedule a run when
    /// the threshold is reached. Returns the handle of a newly scheduled run.
    pub fn on_feedback(&self, modality: Modality) -> Result<Option<RunHandle>, RetrainError> {
        if self.is_running(modality) {
            debug!(modality = %modality, "Retraining already in flight");
            return Ok(None);
        }
        let count = self.feedback_since_last_run(modality)?;
        if count < self.threshold {
            debug!(modality = %modality, count, threshold = self.threshold, "Below retraining threshold");
            return Ok(None);
        }

        info!(modality = %modality, count, threshold = self.threshold, "Feedback threshold reached");
        match self.spawn(modality, TriggerReason::FeedbackThreshold { feedback_count: count }) {
            Ok(handle) => Ok(Some(handle)),
            Err(RetrainError::AlreadyRunning(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start a run on operator request; `AlreadyRunning` when one is in flight.
    pub fn trigger_manual(&self, modality: Modality) -> Result<RunHandle, RetrainError> {
        self.spawn(modality, TriggerReason::Manual)
    }

    pub fn trigger_bootstrap(&self, modality: Modality) -> Result<RunHandle, RetrainError> {
        self.spawn(modality, TriggerReason::Bootstrap)
    }

    fn spawn(&self, modality: Modality, reason: TriggerReason) -> Result<RunHandle, RetrainError> {
        let flag = self.flag(modality).clone();
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RetrainError::AlreadyRunning(modality));
        }
        let guard = InFlight(flag);

        let job = self.job.clone();
        let metrics = self.metrics.clone();
        let timeout = self.timeout;

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let cancel = CancellationToken::new();
            let worker_cancel = cancel.clone();
            let mut worker =
                tokio::task::spawn_blocking(move || job.run(modality, reason, &worker_cancel));

            let finished = tokio::time::timeout(timeout, &mut worker).await;
            let result = match finished {
                Ok(joined) => joined.unwrap_or_else(|e| {
                    Err(RetrainError::Training(format!("retraining worker failed: {e}")))
                }),
                Err(_) => {
                    warn!(modality = %modality, timeout_secs = timeout.as_secs(), "Retraining timed out, cancelling");
                    cancel.cancel();
                    if let Err(e) = worker.await {
                        error!(modality = %modality, error = %e, "Retraining worker failed after cancellation");
                    }
                    Err(RetrainError::TimedOut(timeout.as_secs()))
                }
            };

            match &result {
                Ok(run) => metrics.record_retraining(run.decision.label()),
                Err(e) => {
                    metrics.record_retraining("aborted");
                    warn!(modality = %modality, error = %e, "Retraining run did not complete");
                }
            }
            result
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance::prediction;
    use crate::store::MemoryStore;
    use crate::types::{Label, RunDecision};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Blocks until released, records one run per call
    struct GatedJob {
        store: Arc<dyn Store>,
        calls: AtomicUsize,
        release: AtomicBool,
    }

    impl RetrainJob for GatedJob {
        fn run(
            &self,
            modality: Modality,
            trigger: TriggerReason,
            cancel: &CancellationToken,
        ) -> Result<RetrainingRun, RetrainError> {
            let started_at = Utc::now();
            self.calls.fetch_add(1, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                cancel.check()?;
                std::thread::sleep(Duration::from_millis(5));
            }
            let run = RetrainingRun {
                decision: RunDecision::Rejected,
                ..RetrainingRun::aborted(modality, trigger, started_at, String::new())
            };
            self.store.insert_retraining_run(&run)?;
            Ok(run)
        }
    }

    fn setup(threshold: u64, timeout: Duration) -> (RetrainingTrigger, Arc<GatedJob>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let job = Arc::new(GatedJob {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            release: AtomicBool::new(false),
        });
        let trigger = RetrainingTrigger::new(
            job.clone(),
            store.clone(),
            Arc::new(PipelineMetrics::new()),
            threshold,
            timeout,
        );
        (trigger, job, store)
    }

    fn feedback(store: &MemoryStore) {
        let record = prediction(100.0, Label::Legitimate);
        store.insert_prediction(&record).unwrap();
        store
            .record_feedback(record.id, Label::Fraud, "", Utc::now())
            .unwrap();
    }

    #[tokio::test]
    async fn test_threshold_schedules_exactly_one_run() {
        let (trigger, job, store) = setup(3, Duration::from_secs(30));

        feedback(&store);
        assert!(trigger.on_feedback(Modality::Banking).unwrap().is_none());
        feedback(&store);
        assert!(trigger.on_feedback(Modality::Banking).unwrap().is_none());

        feedback(&store);
        let handle = trigger.on_feedback(Modality::Banking).unwrap().unwrap();
        assert!(trigger.is_running(Modality::Banking));

        // Give the worker time to start before more feedback arrives
        while job.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        for _ in 0..3 {
            feedback(&store);
            assert!(trigger.on_feedback(Modality::Banking).unwrap().is_none());
        }
        assert!(matches!(
            trigger.trigger_manual(Modality::Banking),
            Err(RetrainError::AlreadyRunning(Modality::Banking))
        ));

        job.release.store(true, Ordering::SeqCst);
        let run = handle.await.unwrap().unwrap();
        assert_eq!(run.trigger_reason, TriggerReason::FeedbackThreshold { feedback_count: 3 });
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
        assert!(!trigger.is_running(Modality::Banking));

        let status = trigger.status(Modality::Banking).unwrap();
        assert_eq!(status.feedback_count, 3);
        assert_eq!(status.threshold, 3);
        assert!(!status.currently_retraining);
        assert_eq!(status.last_run.map(|r| r.id), Some(run.id));
    }

    #[tokio::test]
    async fn test_modalities_are_independent() {
        let (trigger, job, _store) = setup(1, Duration::from_secs(30));
        let banking = trigger.trigger_manual(Modality::Banking).unwrap();
        let card = trigger.trigger_manual(Modality::CreditCard).unwrap();
        job.release.store(true, Ordering::SeqCst);

        assert_eq!(banking.await.unwrap().unwrap().modality, Modality::Banking);
        assert_eq!(card.await.unwrap().unwrap().modality, Modality::CreditCard);
        assert_eq!(job.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_releases_after_worker_stops() {
        let (trigger, job, _store) = setup(1, Duration::from_millis(50));
        let handle = trigger.trigger_manual(Modality::Banking).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RetrainError::TimedOut(_))));
        assert!(!trigger.is_running(Modality::Banking));
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);

        // A fresh run can start once the flag is released
        job.release.store(true, Ordering::SeqCst);
        let run = trigger.trigger_manual(Modality::Banking).unwrap().await.unwrap();
        assert!(run.is_ok());
    }
}
