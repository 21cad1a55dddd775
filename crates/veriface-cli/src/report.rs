use crate::engine::VerifyOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use veriface_core::Thresholds;

/// Printable summary of one verification.
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub verified: bool,
    pub ratio: f32,
    pub detections: usize,
    pub references: usize,
    pub scores: Vec<ReferenceScore>,
    pub thresholds: Thresholds,
    pub input_image: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReferenceScore {
    pub reference: String,
    pub score: f32,
}

impl VerifyReport {
    pub fn new(outcome: &VerifyOutcome, thresholds: Thresholds) -> Self {
        let v = &outcome.verification;
        Self {
            verified: v.verified,
            ratio: v.ratio,
            detections: v.detections,
            references: v.scores.len(),
            scores: outcome
                .reference_names
                .iter()
                .zip(&v.scores)
                .map(|(name, &score)| ReferenceScore {
                    reference: name.clone(),
                    score,
                })
                .collect(),
            thresholds,
            input_image: outcome.input_image.display().to_string(),
            checked_at: Utc::now(),
        }
    }

    pub fn label(&self) -> &'static str {
        if self.verified {
            "Verified"
        } else {
            "Unverified"
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.label());
        let _ = writeln!(
            out,
            "  matches: {}/{} (ratio {:.3}, needs > {:.3})",
            self.detections, self.references, self.ratio, self.thresholds.verification
        );
        let _ = writeln!(out, "  input:   {}", self.input_image);
        for s in &self.scores {
            let mark = if s.score > self.thresholds.detection { "+" } else { " " };
            let _ = writeln!(out, "  {mark} {:.6}  {}", s.score, s.reference);
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
