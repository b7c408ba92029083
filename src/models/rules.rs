//! Rule-based probability dampening from trust signals.
//!
//! Each rule reads one trust signal from the raw record and, when the signal
//! was supplied and satisfies a tier, multiplies the probability by that
//! tier's factor. Factors lie in (0, 1], so the chain never raises a score.

use crate::features::banking::TimeBucket;
use crate::types::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};

/// Trust signal a dampener reads from the raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSignal {
    /// amount / 7-day average amount
    AmountVsAverage,
    /// failed transactions over the last 7 days
    FailedCount,
    /// card or account age in days
    CardAge,
    /// distance from the usual location in km
    Distance,
    /// balance / amount
    BalanceCoverage,
    /// hour of day
    TimeOfDay,
}

impl TrustSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustSignal::AmountVsAverage => "amount_vs_average",
            TrustSignal::FailedCount => "failed_count",
            TrustSignal::CardAge => "card_age",
            TrustSignal::Distance => "distance",
            TrustSignal::BalanceCoverage => "balance_coverage",
            TrustSignal::TimeOfDay => "time_of_day",
        }
    }

    /// Signal value, only when the underlying input was actually supplied.
    pub fn read(&self, record: &TransactionRecord) -> Option<f64> {
        let TransactionRecord::Banking(tx) = record else {
            return None;
        };
        match self {
            TrustSignal::AmountVsAverage => tx
                .avg_amount_7d
                .filter(|avg| *avg > 0.0)
                .map(|avg| tx.amount / avg),
            TrustSignal::FailedCount => tx.failed_count_7d.map(f64::from),
            TrustSignal::CardAge => tx.card_age_days.map(f64::from),
            TrustSignal::Distance => tx.distance_km,
            TrustSignal::BalanceCoverage => (tx.amount > 0.0).then(|| tx.balance / tx.amount),
            TrustSignal::TimeOfDay => tx
                .timestamp
                .as_deref()
                .and_then(TimeBucket::parse)
                .map(|t| f64::from(t.hour)),
        }
    }
}

/// Comparison a signal value must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    AtMost(f64),
    LessThan(f64),
    GreaterThan(f64),
    AtLeast(f64),
    /// Inclusive range
    Between(f64, f64),
}

impl Condition {
    pub fn matches(&self, value: f64) -> bool {
        match *self {
            Condition::AtMost(b) => value <= b,
            Condition::LessThan(b) => value < b,
            Condition::GreaterThan(b) => value > b,
            Condition::AtLeast(b) => value >= b,
            Condition::Between(lo, hi) => (lo..=hi).contains(&value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DampenerTier {
    pub when: Condition,
    pub factor: f64,
}

/// One rule of the chain; the first matching tier wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DampenerRule {
    pub signal: TrustSignal,
    pub tiers: Vec<DampenerTier>,
}

impl DampenerRule {
    fn new(signal: TrustSignal, tiers: &[(Condition, f64)]) -> Self {
        Self {
            signal,
            tiers: tiers
                .iter()
                .map(|(when, factor)| DampenerTier {
                    when: *when,
                    factor: *factor,
                })
                .collect(),
        }
    }

    /// Factor this rule applies to the record, if any.
    pub fn factor_for(&self, record: &TransactionRecord) -> Option<f64> {
        let value = self.signal.read(record)?;
        self.tiers
            .iter()
            .find(|tier| tier.when.matches(value))
            .map(|tier| tier.factor)
    }
}

/// A dampener that fired during scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDampener {
    pub signal: TrustSignal,
    pub factor: f64,
}

/// Ordered chain of dampening rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DampenerChain {
    pub rules: Vec<DampenerRule>,
}

impl DampenerChain {
    pub fn new(rules: Vec<DampenerRule>) -> Self {
        Self { rules }
    }

    /// A chain that never adjusts.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Every factor must lie in (0, 1].
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.rules {
            for tier in &rule.tiers {
                if !(tier.factor > 0.0 && tier.factor <= 1.0) {
                    return Err(format!(
                        "dampener factor for {} must lie in (0, 1], got {}",
                        rule.signal.as_str(),
                        tier.factor
                    ));
                }
            }
        }
        Ok(())
    }

    /// Apply the chain in order and return the dampened probability.
    pub fn apply(&self, record: &TransactionRecord, probability: f64) -> (f64, Vec<AppliedDampener>) {
        let mut adjusted = probability;
        let mut applied = Vec::new();
        for rule in &self.rules {
            if let Some(factor) = rule.factor_for(record) {
                // Out-of-range factors from an unvalidated chain are clamped
                let factor = factor.clamp(0.0, 1.0);
                adjusted *= factor;
                applied.push(AppliedDampener {
                    signal: rule.signal,
                    factor,
                });
            }
        }
        (adjusted, applied)
    }
}

impl Default for DampenerChain {
    fn default() -> Self {
        use Condition::*;
        Self::new(vec![
            DampenerRule::new(
                TrustSignal::AmountVsAverage,
                &[(AtMost(1.5), 0.80), (AtMost(2.0), 0.90), (AtMost(2.5), 0.95)],
            ),
            DampenerRule::new(TrustSignal::FailedCount, &[(AtMost(0.0), 0.70), (AtMost(2.0), 0.80)]),
            DampenerRule::new(
                TrustSignal::CardAge,
                &[(GreaterThan(365.0), 0.85), (GreaterThan(180.0), 0.90), (GreaterThan(90.0), 0.95)],
            ),
            DampenerRule::new(TrustSignal::Distance, &[(LessThan(30.0), 0.88), (LessThan(100.0), 0.93)]),
            DampenerRule::new(
                TrustSignal::BalanceCoverage,
                &[(AtLeast(2.0), 0.70), (AtLeast(1.0), 0.85), (AtLeast(0.5), 0.90)],
            ),
            DampenerRule::new(TrustSignal::TimeOfDay, &[(Between(9.0, 20.0), 0.95)]),
        ])
    }
}
