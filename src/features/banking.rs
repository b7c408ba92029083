//! Feature derivation for direct-attribute (banking) transactions

use super::DerivedFeatures;
use crate::types::transaction::{BankingTransaction, Modality};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};

pub const DEFAULT_CHANNEL: &str = "POS";
pub const DEFAULT_DAILY_COUNT: u32 = 1;
pub const DEFAULT_FAILED_COUNT: u32 = 0;
pub const DEFAULT_CARD_AGE_DAYS: u32 = 100;
pub const DEFAULT_DISTANCE_KM: f64 = 500.0;

/// Neutral time bucket used when the timestamp cannot be read
const FALLBACK_HOUR: u32 = 12;
const FALLBACK_DAY_OF_WEEK: u32 = 2;

pub const FEATURE_NAMES: &[&str] = &[
    "amount",
    "balance",
    "spend_ratio",
    "amount_vs_avg",
    "within_2x_avg",
    "within_3x_avg",
    "amount_log",
    "balance_log",
    "hour",
    "day_of_week",
    "is_weekend",
    "late_night",
    "very_late_night",
    "business_hours",
    "early_morning",
    "is_atm",
    "is_online",
    "is_pos",
    "is_transfer",
    "daily_count",
    "high_daily_count",
    "very_high_daily_count",
    "reasonable_daily_count",
    "avg_7d",
    "failed_7d",
    "any_failed",
    "few_failed",
    "many_failed",
    "card_age",
    "very_new_card",
    "new_card",
    "established_card",
    "mature_card",
    "distance",
    "local_txn",
    "nearby_txn",
    "far_txn",
    "very_far_txn",
    "small_amount",
    "normal_amount",
    "large_amount",
    "very_large_amount",
    "healthy_balance",
    "low_balance",
    "suspicious_ip",
    "trust_score",
    "high_trust",
    "night_high_spend",
    "night_large_amount",
    "distance_night",
    "new_card_large",
    "atm_night_far",
    "online_night",
    "weekend_night",
    "velocity_alert",
];

pub const CONTINUOUS_FEATURES: &[&str] = &[
    "amount",
    "balance",
    "spend_ratio",
    "amount_vs_avg",
    "amount_log",
    "balance_log",
    "hour",
    "day_of_week",
    "daily_count",
    "avg_7d",
    "failed_7d",
    "card_age",
    "distance",
    "trust_score",
];

/// Hour, weekday (Monday = 0) and weekend flag of a wall-clock timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub hour: u32,
    pub day_of_week: u32,
    pub is_weekend: bool,
}

impl TimeBucket {
    fn neutral() -> Self {
        Self {
            hour: FALLBACK_HOUR,
            day_of_week: FALLBACK_DAY_OF_WEEK,
            is_weekend: false,
        }
    }

    /// Parse `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or RFC 3339.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))?;

        let day_of_week = naive.weekday().num_days_from_monday();
        Some(Self {
            hour: naive.hour(),
            day_of_week,
            is_weekend: day_of_week >= 5,
        })
    }

    /// Parsed bucket, or the neutral bucket plus a `true` defaulted flag.
    pub fn resolve(raw: Option<&str>) -> (Self, bool) {
        match raw.and_then(Self::parse) {
            Some(bucket) => (bucket, false),
            None => (Self::neutral(), true),
        }
    }
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn channel_has(channel: &str, needle: &str) -> bool {
    channel.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

pub(crate) fn derive(tx: &BankingTransaction) -> DerivedFeatures {
    let amount = tx.amount;
    let balance = tx.balance;
    let channel = tx.channel.as_deref().unwrap_or(DEFAULT_CHANNEL);
    let daily_count = tx.daily_count.unwrap_or(DEFAULT_DAILY_COUNT);
    let avg_7d = tx.avg_amount_7d.unwrap_or(amount);
    let failed_7d = tx.failed_count_7d.unwrap_or(DEFAULT_FAILED_COUNT);
    let card_age = tx.card_age_days.unwrap_or(DEFAULT_CARD_AGE_DAYS);
    let distance = tx.distance_km.unwrap_or(DEFAULT_DISTANCE_KM);
    let suspicious_ip = tx.ip_flag.unwrap_or(0) > 0;

    let (time, time_defaulted) = TimeBucket::resolve(tx.timestamp.as_deref());
    let hour = time.hour;

    // Overdrawn balances floor the denominator at 1
    let spend_ratio = amount / (balance + amount + 1.0).max(1.0);
    let amount_vs_avg = amount / (avg_7d + 1.0);
    let within_2x_avg = amount <= avg_7d * 2.0;
    let within_3x_avg = amount <= avg_7d * 3.0;

    let late_night = hour >= 23 || hour <= 5;
    let very_late_night = (1..=4).contains(&hour);
    let business_hours = (9..=17).contains(&hour);
    let early_morning = hour <= 4;

    let is_atm = channel_has(channel, "ATM");
    let is_online = channel_has(channel, "Online");
    let is_pos = channel_has(channel, "POS");
    let is_transfer = channel_has(channel, "Transfer");

    let high_daily_count = daily_count > 10;
    let reasonable_daily_count = daily_count <= 10;
    let any_failed = failed_7d > 0;
    let few_failed = failed_7d <= 2;

    let new_card = card_age < 30;
    let established_card = card_age > 90;

    let far_txn = distance > 1000.0;
    let large_amount = amount > 500.0;

    let trust_score = [
        established_card,
        few_failed,
        balance >= amount,
        within_2x_avg,
        reasonable_daily_count,
    ]
    .iter()
    .filter(|&&signal| signal)
    .count() as f64;

    let values = vec![
        ("amount", amount),
        ("balance", balance),
        ("spend_ratio", spend_ratio),
        ("amount_vs_avg", amount_vs_avg),
        ("within_2x_avg", flag(within_2x_avg)),
        ("within_3x_avg", flag(within_3x_avg)),
        ("amount_log", amount.max(0.0).ln_1p()),
        ("balance_log", balance.max(0.0).ln_1p()),
        ("hour", hour as f64),
        ("day_of_week", time.day_of_week as f64),
        ("is_weekend", flag(time.is_weekend)),
        ("late_night", flag(late_night)),
        ("very_late_night", flag(very_late_night)),
        ("business_hours", flag(business_hours)),
        ("early_morning", flag(early_morning)),
        ("is_atm", flag(is_atm)),
        ("is_online", flag(is_online)),
        ("is_pos", flag(is_pos)),
        ("is_transfer", flag(is_transfer)),
        ("daily_count", daily_count as f64),
        ("high_daily_count", flag(high_daily_count)),
        ("very_high_daily_count", flag(daily_count > 15)),
        ("reasonable_daily_count", flag(reasonable_daily_count)),
        ("avg_7d", avg_7d),
        ("failed_7d", failed_7d as f64),
        ("any_failed", flag(any_failed)),
        ("few_failed", flag(few_failed)),
        ("many_failed", flag(failed_7d > 5)),
        ("card_age", card_age as f64),
        ("very_new_card", flag(card_age < 7)),
        ("new_card", flag(new_card)),
        ("established_card", flag(established_card)),
        ("mature_card", flag(card_age > 180)),
        ("distance", distance),
        ("local_txn", flag(distance < 50.0)),
        ("nearby_txn", flag(distance < 200.0)),
        ("far_txn", flag(far_txn)),
        ("very_far_txn", flag(distance > 3000.0)),
        ("small_amount", flag(amount < 100.0)),
        ("normal_amount", flag((100.0..=500.0).contains(&amount))),
        ("large_amount", flag(large_amount)),
        ("very_large_amount", flag(amount > 2000.0)),
        ("healthy_balance", flag(balance > 5000.0)),
        ("low_balance", flag(balance < 1000.0)),
        ("suspicious_ip", flag(suspicious_ip)),
        ("trust_score", trust_score),
        ("high_trust", flag(trust_score >= 4.0)),
        ("night_high_spend", flag(late_night && spend_ratio > 0.6)),
        ("night_large_amount", flag(late_night && large_amount)),
        ("distance_night", flag(late_night && far_txn)),
        ("new_card_large", flag(new_card && large_amount)),
        ("atm_night_far", flag(is_atm && late_night && far_txn)),
        ("online_night", flag(is_online && late_night)),
        ("weekend_night", flag(time.is_weekend && late_night)),
        ("velocity_alert", flag(high_daily_count && any_failed)),
    ];

    DerivedFeatures::new(Modality::Banking, values, time_defaulted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn derive_tx(tx: BankingTransaction) -> DerivedFeatures {
        derive(&tx)
    }

    #[test]
    fn test_timestamp_formats() {
        let sql = TimeBucket::parse("2024-03-02 23:15:00").unwrap();
        assert_eq!(sql.hour, 23);
        assert_eq!(sql.day_of_week, 5);
        assert!(sql.is_weekend);

        let rfc = TimeBucket::parse("2024-03-04T10:00:00+02:00").unwrap();
        assert_eq!(rfc.hour, 10);
        assert_eq!(rfc.day_of_week, 0);
        assert!(!rfc.is_weekend);
    }

    #[test]
    fn test_unparseable_timestamp_uses_neutral_bucket() {
        let features = derive_tx(BankingTransaction::new(50.0, 500.0).with_timestamp("yesterday-ish"));
        assert!(features.time_defaulted);
        assert_eq!(features.get("hour"), Some(12.0));
        assert_eq!(features.get("day_of_week"), Some(2.0));
        assert_eq!(features.get("is_weekend"), Some(0.0));
        assert_eq!(features.get("late_night"), Some(0.0));
        assert_eq!(features.get("business_hours"), Some(1.0));

        let missing = derive_tx(BankingTransaction::new(50.0, 500.0));
        assert!(missing.time_defaulted);
    }

    #[test]
    fn test_neutral_defaults() {
        let features = derive_tx(BankingTransaction::new(80.0, 400.0));
        assert_eq!(features.get("daily_count"), Some(1.0));
        assert_eq!(features.get("avg_7d"), Some(80.0));
        assert_eq!(features.get("failed_7d"), Some(0.0));
        assert_eq!(features.get("card_age"), Some(100.0));
        assert_eq!(features.get("distance"), Some(500.0));
        assert_eq!(features.get("is_pos"), Some(1.0));
        assert_eq!(features.get("suspicious_ip"), Some(0.0));
    }

    #[test]
    fn test_ratio_and_log_features() {
        let features = derive_tx(
            BankingTransaction::new(100.0, 899.0).with_history(49.0, 0, 2),
        );
        assert!((features.get("spend_ratio").unwrap() - 0.1).abs() < 1e-12);
        assert!((features.get("amount_vs_avg").unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(features.get("within_2x_avg"), Some(0.0));
        assert_eq!(features.get("within_3x_avg"), Some(1.0));
        assert!((features.get("amount_log").unwrap() - 101f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_channel_flags_are_case_insensitive() {
        let features = derive_tx(BankingTransaction::new(10.0, 10.0).with_channel("atm withdrawal"));
        assert_eq!(features.get("is_atm"), Some(1.0));
        assert_eq!(features.get("is_pos"), Some(0.0));

        let features = derive_tx(BankingTransaction::new(10.0, 10.0).with_channel("Bank Transfer"));
        assert_eq!(features.get("is_transfer"), Some(1.0));
    }

    #[test]
    fn test_late_night_composites() {
        let tx = BankingTransaction::new(5000.0, 200.0)
            .with_timestamp("2024-03-01 02:30:00")
            .with_channel("ATM Withdrawal")
            .with_card_age(5)
            .with_distance(3500.0);
        let features = derive_tx(tx);

        assert!(!features.time_defaulted);
        for name in [
            "late_night",
            "very_late_night",
            "early_morning",
            "night_high_spend",
            "night_large_amount",
            "distance_night",
            "new_card_large",
            "atm_night_far",
            "very_new_card",
            "very_far_txn",
        ] {
            assert_eq!(features.get(name), Some(1.0), "{name}");
        }
        assert_eq!(features.get("online_night"), Some(0.0));
        assert_eq!(features.get("business_hours"), Some(0.0));
    }

    #[test]
    fn test_trust_score() {
        let trusted = BankingTransaction::new(20.0, 10_000.0)
            .with_card_age(1000)
            .with_history(25.0, 0, 2);
        let features = derive_tx(trusted);
        assert_eq!(features.get("trust_score"), Some(5.0));
        assert_eq!(features.get("high_trust"), Some(1.0));

        let untrusted = BankingTransaction::new(5000.0, 200.0)
            .with_card_age(5)
            .with_history(100.0, 6, 20);
        let features = derive_tx(untrusted);
        assert_eq!(features.get("trust_score"), Some(0.0));
        assert_eq!(features.get("velocity_alert"), Some(1.0));
    }

    #[test]
    fn test_overdrawn_balance_stays_finite() {
        let features = derive_tx(BankingTransaction::new(100.0, -101.0));
        assert_eq!(features.get("spend_ratio"), Some(100.0));
        assert_eq!(features.get("balance_log"), Some(0.0));

        let features = derive_tx(BankingTransaction::new(0.0, -1.0));
        assert_eq!(features.get("spend_ratio"), Some(0.0));
        assert!(features.values.iter().all(|(_, v)| v.is_finite()));
    }

    proptest! {
        #[test]
        fn prop_derived_features_are_finite(
            amount in prop::num::f64::NORMAL.prop_map(f64::abs),
            balance in prop::num::f64::NORMAL,
            overdrawn in any::<bool>(),
            avg_7d in prop::option::of(prop::num::f64::NORMAL.prop_map(f64::abs)),
            distance in prop::option::of(prop::num::f64::NORMAL.prop_map(f64::abs)),
            daily in any::<u32>(),
            failed in any::<u32>(),
            card_age in any::<u32>(),
        ) {
            let balance = if overdrawn { -(amount + 1.0) } else { balance };
            let mut tx = BankingTransaction::new(amount, balance)
                .with_timestamp("2024-03-02 03:00:00")
                .with_card_age(card_age);
            tx.avg_amount_7d = avg_7d;
            tx.distance_km = distance;
            tx.daily_count = Some(daily);
            tx.failed_count_7d = Some(failed);

            let features = derive_tx(tx);
            prop_assert_eq!(features.values.len(), FEATURE_NAMES.len());
            for (name, value) in &features.values {
                prop_assert!(value.is_finite(), "{} = {}", name, value);
            }
        }
    }
}
