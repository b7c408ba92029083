//! Narrative text for scored transactions

use crate::error::ExplanationProviderError;
use crate::types::{Contribution, Label, Modality, RiskTier};
use std::fmt::Write;

/// Input handed to a narrative provider
#[derive(Debug, Clone)]
pub struct NarrativeRequest<'a> {
    pub modality: Modality,
    pub probability: f64,
    pub decision: Label,
    pub risk_tier: RiskTier,
    pub amount: f64,
    pub attribution: &'a [Contribution],
}

/// External text generator for score explanations
pub trait NarrativeProvider: Send + Sync {
    fn narrate(&self, request: &NarrativeRequest<'_>) -> Result<String, ExplanationProviderError>;
}

/// Deterministic templated narrative, used when no provider is available
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    pub fn render(&self, request: &NarrativeRequest<'_>) -> String {
        let mut text = String::new();
        if request.decision.is_fraud() {
            let _ = writeln!(
                text,
                "FRAUD ALERT ({:.1}% confidence)\n\n${:.2} {} transaction flagged as {} RISK.\n\nKey factors:",
                request.probability * 100.0,
                request.amount,
                request.modality,
                request.risk_tier
            );
            for c in request.attribution.iter().take(3) {
                let _ = writeln!(text, "- {}: {:.2}", c.feature, c.value);
            }
            let _ = write!(text, "\nRecommendation: {}.", request.risk_tier.recommended_action());
        } else {
            let _ = write!(
                text,
                "Normal transaction ({:.1}% confidence)\n\n${:.2} {} transaction shows {} risk.\nRecommendation: {}.",
                (1.0 - request.probability) * 100.0,
                request.amount,
                request.modality,
                request.risk_tier,
                request.risk_tier.recommended_action()
            );
        }
        text
    }
}

impl NarrativeProvider for TemplateNarrator {
    fn narrate(&self, request: &NarrativeRequest<'_>) -> Result<String, ExplanationProviderError> {
        Ok(self.render(request))
    }
}
