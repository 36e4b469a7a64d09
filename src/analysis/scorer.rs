use crate::analysis::{ConfidenceScorer, ScoreInputs};
use crate::error::Result;

/// Weighted blend of classification confidence and evidence gathered by the
/// later steps. Weights need not sum to one; the score is clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct WeightedConfidenceScorer {
    pub classification: f64,
    pub similar_tickets: f64,
    pub docs: f64,
    pub code_analysis: f64,
    pub fix: f64,
}

impl Default for WeightedConfidenceScorer {
    fn default() -> Self {
        Self {
            classification: 0.4,
            similar_tickets: 0.15,
            docs: 0.1,
            code_analysis: 0.15,
            fix: 0.2,
        }
    }
}

impl ConfidenceScorer for WeightedConfidenceScorer {
    fn score(&self, inputs: ScoreInputs<'_>) -> Result<f64> {
        let classification = inputs
            .classification
            .map(|c| c.confidence().clamp(0.0, 1.0))
            .unwrap_or(0.0);

        // Saturates at five similar tickets and three documents.
        let similar = (inputs.similar_tickets.len() as f64 / 5.0).min(1.0);
        let docs = (inputs.docs.len() as f64 / 3.0).min(1.0);
        let code = if inputs.code_analysis.is_some() { 1.0 } else { 0.0 };
        let fix = match inputs.fix {
            Some(fix) if !fix.trim().is_empty() => 1.0,
            _ => 0.0,
        };

        let score = self.classification * classification
            + self.similar_tickets * similar
            + self.docs * docs
            + self.code_analysis * code
            + self.fix * fix;

        Ok(score.clamp(0.0, 1.0))
    }
}
