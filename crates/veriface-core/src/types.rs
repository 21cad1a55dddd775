use crate::verify::VerifyError;
use serde::{Deserialize, Serialize};

/// Per-pair score above which a single comparison counts as a match.
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.99;
/// Fraction of matching references required to declare the face verified.
pub const DEFAULT_VERIFICATION_THRESHOLD: f32 = 0.8;

/// The two cutoffs that turn raw scores into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Per-pair similarity cutoff (strict `>`).
    pub detection: f32,
    /// Fraction-of-matches cutoff in [0, 1] (strict `>`).
    pub verification: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            detection: DEFAULT_DETECTION_THRESHOLD,
            verification: DEFAULT_VERIFICATION_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Build a validated pair of thresholds.
    pub fn new(detection: f32, verification: f32) -> Result<Self, VerifyError> {
        let thresholds = Self {
            detection,
            verification,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), VerifyError> {
        if !self.detection.is_finite() {
            return Err(VerifyError::InvalidThreshold(format!(
                "detection threshold must be finite, got {}",
                self.detection
            )));
        }
        if !(0.0..=1.0).contains(&self.verification) {
            return Err(VerifyError::InvalidThreshold(format!(
                "verification threshold must be between 0.0 and 1.0, got {}",
                self.verification
            )));
        }
        Ok(())
    }
}

/// Outcome of verifying one live image against a reference set.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// One score per reference image, in reference-set order.
    pub scores: Vec<f32>,
    /// Number of scores strictly above the detection threshold.
    pub detections: usize,
    /// `detections / scores.len()`.
    pub ratio: f32,
    pub verified: bool,
}
