//! Test Request Producer
//!
//! Sends scoring requests for both modalities to the service over NATS and
//! optionally answers a share of them with ground-truth feedback.

use rand::Rng;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

const COMPONENTS: usize = 28;

/// Request generator for testing
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    fn timestamp(&mut self, hour: u32) -> String {
        format!(
            "2024-{:02}-{:02} {:02}:{:02}:00",
            self.rng.gen_range(1..=12),
            self.rng.gen_range(1..=28),
            hour,
            self.rng.gen_range(0..60)
        )
    }

    /// Generate a legitimate-looking banking request
    fn banking_legitimate(&mut self) -> Value {
        let hour = self.rng.gen_range(9..20);
        json!({
            "mode": "banking",
            "amount": self.rng.gen_range(10.0..300.0),
            "balance": self.rng.gen_range(2000.0..20000.0),
            "timestamp": self.timestamp(hour),
            "channel": self.random_choice(&["POS", "Online", "Bank Transfer"]),
            "daily_count": self.rng.gen_range(1..5),
            "avg_amount_7d": self.rng.gen_range(50.0..250.0),
            "failed_count_7d": self.rng.gen_range(0..2),
            "card_age_days": self.rng.gen_range(200..3000),
            "distance_km": self.rng.gen_range(0.0..50.0),
            "ip_flag": 0
        })
    }

    /// Generate a suspicious banking request
    fn banking_suspicious(&mut self) -> Value {
        let hour = [0, 1, 2, 3, 4, 23][self.rng.gen_range(0..6)];
        json!({
            "mode": "banking",
            "amount": self.rng.gen_range(2000.0..10000.0),
            "balance": self.rng.gen_range(0.0..500.0),
            "timestamp": self.timestamp(hour),
            "channel": self.random_choice(&["ATM Withdrawal", "Online"]),
            "daily_count": self.rng.gen_range(8..20),
            "avg_amount_7d": self.rng.gen_range(50.0..150.0),
            "failed_count_7d": self.rng.gen_range(3..8),
            "card_age_days": self.rng.gen_range(1..30),
            "distance_km": self.rng.gen_range(1000.0..5000.0),
            "ip_flag": 1
        })
    }

    /// Generate a credit-card request; suspicious ones push a few components far out
    fn credit_card(&mut self, suspicious: bool) -> Value {
        let mut request = Map::new();
        request.insert("mode".to_string(), json!("credit_card"));
        for i in 1..=COMPONENTS {
            let mut v: f64 = self.rng.gen_range(-1.5..1.5);
            if suspicious && matches!(i, 3 | 10 | 12 | 14 | 17) {
                v -= self.rng.gen_range(4.0..10.0);
            }
            request.insert(format!("V{i}"), json!(v));
        }
        let amount = if suspicious {
            self.rng.gen_range(0.5..5.0)
        } else {
            self.rng.gen_range(5.0..400.0)
        };
        request.insert("Amount".to_string(), json!(amount));
        request.insert("Time".to_string(), json!(self.rng.gen_range(0.0..172_800.0)));
        Value::Object(request)
    }

    fn generate(&mut self, suspicious: bool) -> Value {
        match (self.rng.gen_bool(0.5), suspicious) {
            (true, false) => self.banking_legitimate(),
            (true, true) => self.banking_suspicious(),
            (false, s) => self.credit_card(s),
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let feedback_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let score_subject = "fraud.score";
    let feedback_subject = "fraud.feedback";

    info!(
        nats_url = %nats_url,
        count = count,
        fraud_rate = fraud_rate,
        feedback_rate = feedback_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();

    let mut flagged = 0u64;
    let mut feedback_sent = 0u64;
    let mut failures = 0u64;

    for i in 0..count {
        let suspicious = rng.gen_bool(fraud_rate);
        let request = generator.generate(suspicious);
        let payload = serde_json::to_vec(&request)?;

        let reply = match client.request(score_subject, payload.into()).await {
            Ok(message) => serde_json::from_slice::<Value>(&message.payload)?,
            Err(e) => {
                failures += 1;
                warn!(error = %e, "Scoring request failed");
                continue;
            }
        };

        if let Some(error) = reply.get("error") {
            failures += 1;
            warn!(error = %error, message = %reply["message"], "Service rejected request");
        } else if reply["decision"] == 1 {
            flagged += 1;
        }

        if let Some(id) = reply.get("prediction_id").and_then(Value::as_str) {
            if rng.gen_bool(feedback_rate) {
                // Ground truth follows the generator, with some label noise
                let actual = if rng.gen_bool(0.05) { !suspicious } else { suspicious };
                let feedback = json!({
                    "prediction_id": id,
                    "actual_label": u8::from(actual),
                    "note": "test_producer"
                });
                match client
                    .request(feedback_subject, serde_json::to_vec(&feedback)?.into())
                    .await
                {
                    Ok(_) => feedback_sent += 1,
                    Err(e) => warn!(error = %e, "Feedback request failed"),
                }
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} flagged, {} feedback, {} failed)",
                i + 1,
                count,
                flagged,
                feedback_sent,
                failures
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} requests ({} flagged, {} feedback, {} failed)",
        count, flagged, feedback_sent, failures
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let request = generator.generate(rng.gen_bool(fraud_rate));
        let json = serde_json::to_string_pretty(&request)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
