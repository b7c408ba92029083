//! Feedback-driven retraining: datasets, rebalancing, boosting, evaluation,
//! the run pipeline and its single-flight trigger.

pub mod booster;
pub mod dataset;
pub mod evaluate;
pub mod run;
pub mod sampling;
pub mod trigger;

use crate::error::RetrainError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use booster::{BoosterParams, GradientBooster};
pub use dataset::{Dataset, DatasetSource, JsonlDatasetSource};
pub use run::RetrainingRunner;
pub use trigger::{RetrainJob, RetrainingStatus, RetrainingTrigger};

/// Cooperative cancellation token shared between a run and its supervisor
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), RetrainError> {
        if self.is_cancelled() {
            Err(RetrainError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(RetrainError::Cancelled)));
    }
}
