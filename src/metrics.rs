//! Performance metrics and statistics tracking for the scoring service.

use crate::types::{Outcome, RiskTier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for scoring, feedback and retraining
pub struct PipelineMetrics {
    /// Total transactions scored
    pub transactions_scored: AtomicU64,
    /// Scores that ended in a fraud decision
    pub fraud_decisions: AtomicU64,
    /// Requests that failed before a probability was produced
    pub scoring_errors: AtomicU64,
    /// Attributions served by a fallback method
    pub degraded_attributions: AtomicU64,
    /// Scores computed with the neutral time bucket
    pub time_defaulted: AtomicU64,
    /// Narratives rendered from the template after a provider failure
    pub narrative_fallbacks: AtomicU64,
    scores_by_tier: RwLock<HashMap<RiskTier, u64>>,
    feedback_outcomes: RwLock<HashMap<Outcome, u64>>,
    retraining_decisions: RwLock<HashMap<String, u64>>,
    /// Scoring times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Adjusted probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            transactions_scored: AtomicU64::new(0),
            fraud_decisions: AtomicU64::new(0),
            scoring_errors: AtomicU64::new(0),
            degraded_attributions: AtomicU64::new(0),
            time_defaulted: AtomicU64::new(0),
            narrative_fallbacks: AtomicU64::new(0),
            scores_by_tier: RwLock::new(HashMap::new()),
            feedback_outcomes: RwLock::new(HashMap::new()),
            retraining_decisions: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a scored transaction
    pub fn record_score(&self, processing_time: Duration, probability: f64, tier: RiskTier, fraud: bool) {
        self.transactions_scored.fetch_add(1, Ordering::Relaxed);
        if fraud {
            self.fraud_decisions.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (probability.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
        if let Ok(mut by_tier) = self.scores_by_tier.write() {
            *by_tier.entry(tier).or_insert(0) += 1;
        }
    }

    pub fn record_scoring_error(&self) {
        self.scoring_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_attribution(&self) {
        self.degraded_attributions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_defaulted(&self) {
        self.time_defaulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_narrative_fallback(&self) {
        self.narrative_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of accepted feedback
    pub fn record_feedback(&self, outcome: Outcome) {
        if let Ok(mut outcomes) = self.feedback_outcomes.write() {
            *outcomes.entry(outcome).or_insert(0) += 1;
        }
    }

    /// Record how a retraining run ended ("promoted", "rejected", "aborted")
    pub fn record_retraining(&self, decision: &str) {
        if let Ok(mut decisions) = self.retraining_decisions.write() {
            *decisions.entry(decision.to_string()).or_insert(0) += 1;
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or_default()
    }

    pub fn get_scores_by_tier(&self) -> HashMap<RiskTier, u64> {
        self.scores_by_tier.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn get_feedback_outcomes(&self) -> HashMap<Outcome, u64> {
        self.feedback_outcomes.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn get_retraining_decisions(&self) -> HashMap<String, u64> {
        self.retraining_decisions.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let scored = self.transactions_scored.load(Ordering::Relaxed);
        let fraud = self.fraud_decisions.load(Ordering::Relaxed);
        let fraud_rate = if scored > 0 {
            (fraud as f64 / scored as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             FRAUD SCORING SERVICE - METRICS SUMMARY          ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Scored:    {:>8}  │  Throughput: {:>6.1} tx/s ║",
            scored, throughput
        );
        info!(
            "║ Fraud Decisions:        {:>8}  │  Fraud Rate: {:>6.1}%     ║",
            fraud, fraud_rate
        );
        info!(
            "║ Errors: {:>6}  Degraded: {:>6}  Time defaulted: {:>6}     ║",
            self.scoring_errors.load(Ordering::Relaxed),
            self.degraded_attributions.load(Ordering::Relaxed),
            self.time_defaulted.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Scoring Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}  ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Scores by Risk Tier:                                         ║");
        let mut tiers: Vec<(RiskTier, u64)> = self.get_scores_by_tier().into_iter().collect();
        tiers.sort();
        for (tier, count) in tiers {
            let pct = if scored > 0 {
                (count as f64 / scored as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", tier.as_str(), count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Probability Distribution:                                    ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let outcomes = self.get_feedback_outcomes();
        if !outcomes.is_empty() {
            let get = |o: Outcome| outcomes.get(&o).copied().unwrap_or(0);
            info!(
                tp = get(Outcome::TruePositive),
                tn = get(Outcome::TrueNegative),
                fp = get(Outcome::FalsePositive),
                fn_ = get(Outcome::FalseNegative),
                "Feedback outcomes"
            );
        }
        for (decision, count) in self.get_retraining_decisions() {
            info!(decision = %decision, count, "Retraining runs");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
