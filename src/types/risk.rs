//! Risk tiers derived from the adjusted fraud probability

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Determine the tier from a probability and the configured cutpoints
    pub fn from_probability(probability: f64, cutpoints: &RiskTierCutpoints) -> Self {
        if probability >= cutpoints.critical {
            RiskTier::Critical
        } else if probability >= cutpoints.high {
            RiskTier::High
        } else if probability >= cutpoints.medium {
            RiskTier::Medium
        } else if probability >= cutpoints.low {
            RiskTier::Low
        } else {
            RiskTier::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Minimal => "MINIMAL",
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        }
    }

    /// Recommended operator action for this tier
    pub fn recommended_action(&self) -> &'static str {
        match self {
            RiskTier::Critical => "BLOCK IMMEDIATELY",
            RiskTier::High => "BLOCK AND REVIEW",
            RiskTier::Medium => "FLAG FOR REVIEW",
            RiskTier::Low | RiskTier::Minimal => "APPROVE",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds (inclusive) of each tier above MINIMAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTierCutpoints {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl RiskTierCutpoints {
    /// Cutpoints must lie in [0, 1] and be strictly ascending.
    pub fn validate(&self) -> Result<(), String> {
        let points = [self.low, self.medium, self.high, self.critical];
        if points.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(format!("risk cutpoints must lie in [0, 1]: {points:?}"));
        }
        if points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("risk cutpoints must be strictly ascending: {points:?}"));
        }
        Ok(())
    }
}

impl Default for RiskTierCutpoints {
    fn default() -> Self {
        Self {
            low: 0.2,
            medium: 0.4,
            high: 0.5,
            critical: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_probability() {
        let cutpoints = RiskTierCutpoints::default();

        assert_eq!(RiskTier::from_probability(0.05, &cutpoints), RiskTier::Minimal);
        assert_eq!(RiskTier::from_probability(0.2, &cutpoints), RiskTier::Low);
        assert_eq!(RiskTier::from_probability(0.45, &cutpoints), RiskTier::Medium);
        assert_eq!(RiskTier::from_probability(0.55, &cutpoints), RiskTier::High);
        assert_eq!(RiskTier::from_probability(0.95, &cutpoints), RiskTier::Critical);
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::Low > RiskTier::Minimal);
    }

    #[test]
    fn test_cutpoint_validation() {
        assert!(RiskTierCutpoints::default().validate().is_ok());

        let unordered = RiskTierCutpoints {
            low: 0.5,
            medium: 0.4,
            high: 0.6,
            critical: 0.8,
        };
        assert!(unordered.validate().is_err());
    }

    #[test]
    fn test_tier_serializes_uppercase() {
        let json = serde_json::to_string(&RiskTier::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
