//! Raw transaction records for both scoring modalities

use crate::error::ScoringError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Number of anonymized components carried by a pre-reduced transaction.
pub const REDUCED_COMPONENTS: usize = 28;

/// Transaction schema family, each scored by its own model lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Direct-attribute transactions (amount, balance, timestamp, history counters)
    Banking,
    /// Pre-reduced transactions (anonymized V1..V28 block plus amount/time)
    CreditCard,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Banking, Modality::CreditCard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Banking => "banking",
            Modality::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "banking" | "direct" | "direct_attribute" => Ok(Modality::Banking),
            "credit_card" | "creditcard" | "card" | "pre_reduced" => Ok(Modality::CreditCard),
            other => Err(ScoringError::InputValidation(format!(
                "unknown modality '{other}'"
            ))),
        }
    }
}

/// Direct-attribute transaction as submitted by a bank channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankingTransaction {
    /// Transaction amount
    #[serde(alias = "Transaction_Amount")]
    pub amount: f64,

    /// Account balance after the transaction
    #[serde(alias = "Account_Balance")]
    pub balance: f64,

    /// Wall-clock timestamp (`YYYY-MM-DD HH:MM:SS` or RFC 3339)
    #[serde(default, alias = "Timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Channel, e.g. "ATM Withdrawal", "Online", "POS", "Bank Transfer"
    #[serde(default, alias = "Transaction_Type", skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Transactions on this account today
    #[serde(default, alias = "Daily_Transaction_Count", skip_serializing_if = "Option::is_none")]
    pub daily_count: Option<u32>,

    /// Average transaction amount over the last 7 days
    #[serde(default, alias = "Avg_Transaction_Amount_7d", skip_serializing_if = "Option::is_none")]
    pub avg_amount_7d: Option<f64>,

    /// Failed transactions over the last 7 days
    #[serde(default, alias = "Failed_Transaction_Count_7d", skip_serializing_if = "Option::is_none")]
    pub failed_count_7d: Option<u32>,

    /// Card/account age in days
    #[serde(default, alias = "Card_Age", skip_serializing_if = "Option::is_none")]
    pub card_age_days: Option<u32>,

    /// Distance from the usual transaction location (km)
    #[serde(default, alias = "Transaction_Distance", skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,

    /// 1 when the originating IP address is flagged
    #[serde(default, alias = "IP_Address_Flag", skip_serializing_if = "Option::is_none")]
    pub ip_flag: Option<u8>,
}

impl BankingTransaction {
    /// Create a transaction with only the required fields set.
    pub fn new(amount: f64, balance: f64) -> Self {
        Self {
            amount,
            balance,
            timestamp: None,
            channel: None,
            daily_count: None,
            avg_amount_7d: None,
            failed_count_7d: None,
            card_age_days: None,
            distance_km: None,
            ip_flag: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_card_age(mut self, days: u32) -> Self {
        self.card_age_days = Some(days);
        self
    }

    pub fn with_distance(mut self, km: f64) -> Self {
        self.distance_km = Some(km);
        self
    }

    pub fn with_history(mut self, avg_amount_7d: f64, failed_count_7d: u32, daily_count: u32) -> Self {
        self.avg_amount_7d = Some(avg_amount_7d);
        self.failed_count_7d = Some(failed_count_7d);
        self.daily_count = Some(daily_count);
        self
    }

    fn validate(&self) -> Result<(), ScoringError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(ScoringError::InputValidation(format!(
                "amount must be a non-negative number, got {}",
                self.amount
            )));
        }
        if !self.balance.is_finite() {
            return Err(ScoringError::InputValidation(
                "balance must be a finite number".to_string(),
            ));
        }
        for (name, value) in [("avg_amount_7d", self.avg_amount_7d), ("distance_km", self.distance_km)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ScoringError::InputValidation(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Pre-reduced transaction: an anonymized component block plus amount and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTransaction {
    /// Components V1..V28 in order
    pub components: Vec<f64>,
    /// Transaction amount
    pub amount: f64,
    /// Seconds elapsed since the reference instant of the dataset
    pub time_seconds: f64,
}

impl CardTransaction {
    pub fn new(components: Vec<f64>, amount: f64, time_seconds: f64) -> Self {
        Self {
            components,
            amount,
            time_seconds,
        }
    }

    /// Parse the flat `{"V1": .., "V28": .., "Amount": .., "Time": ..}` layout.
    fn from_flat(value: &Value) -> Result<Self, ScoringError> {
        let mut components = Vec::with_capacity(REDUCED_COMPONENTS);
        for i in 1..=REDUCED_COMPONENTS {
            let key = format!("V{i}");
            let v = value
                .get(&key)
                .or_else(|| value.get(key.to_ascii_lowercase()))
                .ok_or_else(|| {
                    ScoringError::InputValidation(format!(
                        "missing {key}; credit_card transactions require V1-V{REDUCED_COMPONENTS}"
                    ))
                })?;
            components.push(number(v, &key)?);
        }
        let amount = optional_number(value, &["Amount", "amount"])?.unwrap_or(0.0);
        let time_seconds = optional_number(value, &["Time", "time", "time_seconds"])?.unwrap_or(0.0);

        let tx = Self::new(components, amount, time_seconds);
        tx.validate()?;
        Ok(tx)
    }

    fn validate(&self) -> Result<(), ScoringError> {
        if self.components.len() != REDUCED_COMPONENTS {
            return Err(ScoringError::InputValidation(format!(
                "expected {REDUCED_COMPONENTS} components, got {}",
                self.components.len()
            )));
        }
        if self.components.iter().any(|v| !v.is_finite()) {
            return Err(ScoringError::InputValidation(
                "components must be finite numbers".to_string(),
            ));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(ScoringError::InputValidation(format!(
                "Amount must be a non-negative number, got {}",
                self.amount
            )));
        }
        if !self.time_seconds.is_finite() {
            return Err(ScoringError::InputValidation(
                "Time must be a finite number".to_string(),
            ));
        }
        Ok(())
    }
}

/// A raw transaction of either modality. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum TransactionRecord {
    Banking(BankingTransaction),
    CreditCard(CardTransaction),
}

impl TransactionRecord {
    pub fn modality(&self) -> Modality {
        match self {
            TransactionRecord::Banking(_) => Modality::Banking,
            TransactionRecord::CreditCard(_) => Modality::CreditCard,
        }
    }

    /// Transaction amount regardless of modality.
    pub fn amount(&self) -> f64 {
        match self {
            TransactionRecord::Banking(tx) => tx.amount,
            TransactionRecord::CreditCard(tx) => tx.amount,
        }
    }

    /// Parse a raw JSON object for the given modality, validating required fields.
    pub fn from_json(modality: Modality, value: &Value) -> Result<Self, ScoringError> {
        if !value.is_object() {
            return Err(ScoringError::InputValidation(
                "transaction must be a JSON object".to_string(),
            ));
        }
        match modality {
            Modality::Banking => {
                let tx: BankingTransaction = serde_json::from_value(value.clone())
                    .map_err(|e| ScoringError::InputValidation(e.to_string()))?;
                tx.validate()?;
                Ok(TransactionRecord::Banking(tx))
            }
            Modality::CreditCard => Ok(TransactionRecord::CreditCard(CardTransaction::from_flat(value)?)),
        }
    }
}

impl From<BankingTransaction> for TransactionRecord {
    fn from(tx: BankingTransaction) -> Self {
        TransactionRecord::Banking(tx)
    }
}

impl From<CardTransaction> for TransactionRecord {
    fn from(tx: CardTransaction) -> Self {
        TransactionRecord::CreditCard(tx)
    }
}

fn number(value: &Value, key: &str) -> Result<f64, ScoringError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ScoringError::InputValidation(format!("{key} is not a valid number"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ScoringError::InputValidation(format!("{key} is not a valid number: '{s}'"))),
        _ => Err(ScoringError::InputValidation(format!("{key} must be numeric"))),
    }
}

fn optional_number(value: &Value, keys: &[&str]) -> Result<Option<f64>, ScoringError> {
    for key in keys {
        match value.get(*key) {
            Some(Value::Null) | None => continue,
            Some(v) => return number(v, key).map(Some),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card_json() -> Value {
        let mut obj = serde_json::Map::new();
        for i in 1..=REDUCED_COMPONENTS {
            obj.insert(format!("V{i}"), json!(i as f64 * 0.1));
        }
        obj.insert("Amount".to_string(), json!(120.5));
        obj.insert("Time".to_string(), json!(7200));
        Value::Object(obj)
    }

    #[test]
    fn test_banking_accepts_original_column_names() {
        let raw = json!({
            "Transaction_Amount": 250.0,
            "Account_Balance": 1200.0,
            "Timestamp": "2024-03-01 14:30:00",
            "Transaction_Type": "Online",
            "Card_Age": 400
        });

        let record = TransactionRecord::from_json(Modality::Banking, &raw).unwrap();
        match record {
            TransactionRecord::Banking(tx) => {
                assert_eq!(tx.amount, 250.0);
                assert_eq!(tx.card_age_days, Some(400));
                assert_eq!(tx.distance_km, None);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_banking_requires_amount_and_balance() {
        let raw = json!({ "Transaction_Amount": 10.0 });
        let err = TransactionRecord::from_json(Modality::Banking, &raw).unwrap_err();
        assert!(matches!(err, ScoringError::InputValidation(_)));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let raw = json!({ "amount": -5.0, "balance": 10.0 });
        assert!(TransactionRecord::from_json(Modality::Banking, &raw).is_err());
    }

    #[test]
    fn test_card_requires_all_components() {
        let mut raw = card_json();
        raw.as_object_mut().unwrap().remove("V14");
        let err = TransactionRecord::from_json(Modality::CreditCard, &raw).unwrap_err();
        assert!(err.to_string().contains("V14"));
    }

    #[test]
    fn test_card_parses_in_order() {
        let record = TransactionRecord::from_json(Modality::CreditCard, &card_json()).unwrap();
        match record {
            TransactionRecord::CreditCard(tx) => {
                assert_eq!(tx.components.len(), REDUCED_COMPONENTS);
                assert!((tx.components[13] - 1.4).abs() < 1e-12);
                assert_eq!(tx.amount, 120.5);
                assert_eq!(tx.time_seconds, 7200.0);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_modality_parsing() {
        assert_eq!("banking".parse::<Modality>().unwrap(), Modality::Banking);
        assert_eq!("CREDIT_CARD".parse::<Modality>().unwrap(), Modality::CreditCard);
        assert!("crypto".parse::<Modality>().is_err());
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record: TransactionRecord = BankingTransaction::new(20.0, 100.0).into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["modality"], "banking");
        let back: TransactionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
