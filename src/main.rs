//! Fraud Scoring Service - Main Entry Point
//!
//! Serves scoring, feedback and retraining requests over NATS request/reply.
//! Requests are handled concurrently up to the configured worker count.

use anyhow::{Context, Result};
use fraud_scoring::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, PipelineMetrics},
    service::FraudService,
    transport::{dispatch, RequestConsumer, Router},
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_scoring={}", logging.level).parse()?)
        .add_directive(format!("fraud_scoring_service={}", logging.level).parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Fraud Scoring Service");
    info!(
        "Risk tier cutpoints: low>={:.2}, medium>={:.2}, high>={:.2}, critical>={:.2}",
        config.scoring.risk_tiers.low,
        config.scoring.risk_tiers.medium,
        config.scoring.risk_tiers.high,
        config.scoring.risk_tiers.critical
    );
    info!(
        feedback_threshold = config.retraining.feedback_threshold,
        promotion_epsilon = config.retraining.promotion_epsilon,
        "Retraining policy"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let service = Arc::new(FraudService::open(&config, metrics.clone())?);
    service.start().await;

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let router = Arc::new(Router::new(&config.nats));
    let consumer = Arc::new(RequestConsumer::new(client, &router));

    let num_workers = config.pipeline.workers;
    info!("Starting request loop with {} parallel workers", num_workers);

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let handled_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut requests = consumer.subscribe().await?;

    while let Some(message) = requests.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let service = service.clone();
        let router = router.clone();
        let consumer = consumer.clone();
        let metrics = metrics.clone();
        let handled_count = handled_count.clone();

        tokio::spawn(async move {
            let Some(route) = router.route(message.subject.as_str()) else {
                warn!(subject = %message.subject, "Request on unrouted subject");
                return;
            };

            let body = dispatch(&service, route, &message.payload).await;
            if let Err(e) = consumer.reply(&message, &body).await {
                error!(subject = %message.subject, error = %e, "Failed to send reply");
            } else {
                debug!(subject = %message.subject, route = ?route, "Reply sent");
            }

            let count = handled_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let processing_stats = metrics.get_processing_stats();
                info!(
                    handled = count,
                    throughput = format!("{:.1} tx/s", metrics.get_throughput()),
                    avg_latency_us = processing_stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
