//! Verification decision: score a live image against every reference and
//! decide whether enough of them match.

use crate::preprocess::FaceImage;
use crate::reference::ReferenceSet;
use crate::scorer::{Scorer, ScorerError};
use crate::types::{Thresholds, Verification};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("reference set is empty; capture reference images first")]
    EmptyReferenceSet,
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("scoring against reference {reference} failed: {source}")]
    Scorer {
        reference: String,
        source: ScorerError,
    },
}

/// Aggregate per-reference scores into a decision.
///
/// `ratio` is the fraction of scores strictly above `thresholds.detection`;
/// the face is verified when `ratio` is strictly above
/// `thresholds.verification`. An empty score list is an error, never a
/// silent rejection.
pub fn decide(scores: Vec<f32>, thresholds: &Thresholds) -> Result<Verification, VerifyError> {
    thresholds.validate()?;
    if scores.is_empty() {
        return Err(VerifyError::EmptyReferenceSet);
    }

    let detections = scores.iter().filter(|&&s| s > thresholds.detection).count();
    let ratio = detections as f32 / scores.len() as f32;
    let verified = ratio > thresholds.verification;

    Ok(Verification {
        scores,
        detections,
        ratio,
        verified,
    })
}

/// Score `live` against every reference in order, then [`decide`].
///
/// A scorer failure on any reference aborts the whole attempt.
pub fn verify<S: Scorer + ?Sized>(
    scorer: &mut S,
    live: &FaceImage,
    references: &ReferenceSet,
    thresholds: &Thresholds,
) -> Result<Verification, VerifyError> {
    thresholds.validate()?;
    if references.is_empty() {
        return Err(VerifyError::EmptyReferenceSet);
    }

    let mut scores = Vec::with_capacity(references.len());
    for reference in references.iter() {
        let score = scorer
            .score(live, &reference.image)
            .map_err(|source| VerifyError::Scorer {
                reference: reference.name.clone(),
                source,
            })?;
        tracing::debug!(reference = %reference.name, score, "scored reference");
        scores.push(score);
    }

    let verification = decide(scores, thresholds)?;

    tracing::info!(
        references = references.len(),
        detections = verification.detections,
        ratio = verification.ratio,
        verified = verification.verified,
        "verification complete"
    );

    Ok(verification)
}
