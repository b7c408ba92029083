//! NATS request/reply surface of the scoring service

use crate::config::NatsConfig;
use crate::error::{RetrainError, ScoringError};
use crate::service::{request_modality, FeedbackRequest, FeedbackResponse, FraudService};
use crate::types::Modality;
use anyhow::Result;
use async_nats::{Client, Message, Subscriber};
use futures::stream::{self, SelectAll};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Operation served on a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Score,
    Feedback,
    RetrainStatus,
    RetrainTrigger,
}

/// Maps configured subjects to operations
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<(String, Route)>,
}

impl Router {
    pub fn new(config: &NatsConfig) -> Self {
        Self {
            routes: vec![
                (config.score_subject.clone(), Route::Score),
                (config.feedback_subject.clone(), Route::Feedback),
                (config.retrain_status_subject.clone(), Route::RetrainStatus),
                (config.retrain_trigger_subject.clone(), Route::RetrainTrigger),
            ],
        }
    }

    pub fn route(&self, subject: &str) -> Option<Route> {
        self.routes
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, route)| *route)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(s, _)| s.as_str())
    }
}

/// Subscribes to every request subject and merges them into one stream
pub struct RequestConsumer {
    client: Client,
    subjects: Vec<String>,
}

impl RequestConsumer {
    pub fn new(client: Client, router: &Router) -> Self {
        Self {
            client,
            subjects: router.subjects().map(str::to_string).collect(),
        }
    }

    pub async fn subscribe(&self) -> Result<SelectAll<Subscriber>> {
        let mut subscribers = Vec::with_capacity(self.subjects.len());
        for subject in &self.subjects {
            subscribers.push(self.client.subscribe(subject.clone()).await?);
            info!(subject = %subject, "Subscribed to request subject");
        }
        Ok(stream::select_all(subscribers))
    }

    /// Send a JSON reply when the request carries a reply subject
    pub async fn reply(&self, message: &Message, body: &Value) -> Result<()> {
        let Some(reply) = message.reply.clone() else {
            debug!(subject = %message.subject, "Request without reply subject");
            return Ok(());
        };
        let payload = serde_json::to_vec(body)?;
        self.client.publish(reply, payload.into()).await?;
        Ok(())
    }
}

fn scoring_error_kind(err: &ScoringError) -> &'static str {
    match err {
        ScoringError::InputValidation(_) => "input_validation",
        ScoringError::ModelUnavailable(_) => "model_unavailable",
        ScoringError::Inference(_) => "inference",
    }
}

fn error_body(kind: &str, message: impl ToString) -> Value {
    json!({ "error": kind, "message": message.to_string() })
}

fn parse_payload(payload: &[u8]) -> Result<Value, serde_json::Error> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(payload)
}

/// Handle one request and build the JSON reply. Never fails; errors become
/// `{"error", "message"}` bodies.
///
/// Scoring and store access are synchronous, so the handler runs on the
/// blocking pool.
pub async fn dispatch(service: &Arc<FraudService>, route: Route, payload: &[u8]) -> Value {
    let request = match parse_payload(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(route = ?route, error = %e, "Malformed request payload");
            return error_body("malformed_request", e);
        }
    };

    let service = Arc::clone(service);
    match tokio::task::spawn_blocking(move || handle(&service, route, request)).await {
        Ok(body) => body,
        Err(e) => {
            error!(route = ?route, error = %e, "Request handler failed");
            error_body("internal", e)
        }
    }
}

fn handle(service: &FraudService, route: Route, request: Value) -> Value {
    match route {
        Route::Score => match service.score(&request) {
            Ok(response) => serde_json::to_value(&response).unwrap_or_else(|e| error_body("internal", e)),
            Err(e) => error_body(scoring_error_kind(&e), e),
        },
        Route::Feedback => {
            let response = match serde_json::from_value::<FeedbackRequest>(request) {
                Ok(feedback) => service.handle_feedback(&feedback),
                Err(e) => FeedbackResponse {
                    accepted: false,
                    outcome: None,
                    message: Some(e.to_string()),
                },
            };
            serde_json::to_value(&response).unwrap_or_else(|e| error_body("internal", e))
        }
        Route::RetrainStatus => retrain_status(service, &request),
        Route::RetrainTrigger => retrain_trigger(service, &request),
    }
}

fn retrain_status(service: &FraudService, request: &Value) -> Value {
    let modalities = if request.is_null() {
        Modality::ALL.to_vec()
    } else {
        match request_modality(request) {
            Ok(modality) => vec![modality],
            Err(e) => return error_body("input_validation", e),
        }
    };

    let mut statuses = Vec::with_capacity(modalities.len());
    for modality in modalities {
        match service.retraining_status(modality) {
            Ok(status) => statuses.push(status),
            Err(e) => {
                error!(modality = %modality, error = %e, "Failed to read retraining status");
                return error_body("persistence", e);
            }
        }
    }
    json!({ "statuses": statuses })
}

/// Starts a manual run and replies without waiting for it to finish.
fn retrain_trigger(service: &FraudService, request: &Value) -> Value {
    let modality = match request_modality(request) {
        Ok(modality) => modality,
        Err(e) => return error_body("input_validation", e),
    };

    match service.trigger_retraining(modality) {
        Ok(handle) => {
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(run)) => info!(
                        modality = %modality,
                        decision = run.decision.label(),
                        "Manual retraining finished"
                    ),
                    Ok(Err(e)) => warn!(modality = %modality, error = %e, "Manual retraining failed"),
                    Err(e) => error!(modality = %modality, error = %e, "Manual retraining task failed"),
                }
            });
            json!({ "accepted": true, "modality": modality })
        }
        Err(e @ RetrainError::AlreadyRunning(_)) => {
            json!({ "accepted": false, "modality": modality, "message": e.to_string() })
        }
        Err(e) => error_body("retraining", e),
    }
}
