//! Feature derivation for pre-reduced (credit card) transactions

use super::DerivedFeatures;
use crate::types::transaction::{CardTransaction, Modality, REDUCED_COMPONENTS};

pub const FEATURE_NAMES: &[&str] = &[
    "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "V10", "V11", "V12", "V13", "V14",
    "V15", "V16", "V17", "V18", "V19", "V20", "V21", "V22", "V23", "V24", "V25", "V26", "V27",
    "V28", "Amount", "Time", "Hour", "time_gap", "txn_last_1hr", "Amount_log",
    "amount_roll_mean_3", "amount_roll_std_3",
];

pub const CONTINUOUS_FEATURES: &[&str] = &["Amount", "Time", "Hour", "Amount_log"];

pub(crate) fn derive(tx: &CardTransaction) -> DerivedFeatures {
    let mut values = Vec::with_capacity(FEATURE_NAMES.len());
    for (name, value) in FEATURE_NAMES[..REDUCED_COMPONENTS].iter().zip(&tx.components) {
        values.push((*name, *value));
    }

    // Single-record scoring has no history window, so the rolling features
    // collapse onto the current amount.
    values.extend([
        ("Amount", tx.amount),
        ("Time", tx.time_seconds),
        ("Hour", (tx.time_seconds / 3600.0).rem_euclid(24.0)),
        ("time_gap", 0.0),
        ("txn_last_1hr", 1.0),
        ("Amount_log", tx.amount.max(0.0).ln_1p()),
        ("amount_roll_mean_3", tx.amount),
        ("amount_roll_std_3", 0.0),
    ]);

    DerivedFeatures::new(Modality::CreditCard, values, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_derivation() {
        let components: Vec<f64> = (1..=REDUCED_COMPONENTS).map(|i| i as f64).collect();
        let tx = CardTransaction::new(components, 99.0, 90_000.0);
        let features = derive(&tx);

        let names: Vec<&str> = features.values.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, FEATURE_NAMES);
        assert_eq!(features.get("V14"), Some(14.0));
        assert_eq!(features.get("Hour"), Some(1.0));
        assert_eq!(features.get("txn_last_1hr"), Some(1.0));
        assert_eq!(features.get("amount_roll_mean_3"), Some(99.0));
        assert!((features.get("Amount_log").unwrap() - 100f64.ln()).abs() < 1e-12);
        assert!(!features.time_defaulted);
    }
}
