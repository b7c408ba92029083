//! Fraud Scoring Service Library
//!
//! Scores banking and credit-card transactions with tree-ensemble models,
//! explains each score, records ground-truth feedback and retrains models
//! once enough feedback has accumulated.

pub mod config;
pub mod error;
pub mod features;
pub mod feedback;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod retraining;
pub mod service;
pub mod store;
pub mod transport;
pub mod types;

pub use config::AppConfig;
pub use error::{FeedbackError, RetrainError, ScoringError};
pub use models::ScoringEngine;
pub use service::{FraudService, ScoreResponse};
pub use types::{Modality, TransactionRecord};
