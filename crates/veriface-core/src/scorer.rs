//! Siamese similarity scorer via ONNX Runtime.
//!
//! The network embeds both images, takes the L1 distance between the
//! embeddings and maps it to a single match probability. All of that lives
//! inside the exported graph; this module only feeds it two tensors.

use crate::preprocess::FaceImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Graph inputs, in order: live capture, reference image.
const SIAMESE_INPUT_COUNT: usize = 2;

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("model file not found: {0} (export the Siamese network to ONNX and set model_path)")]
    ModelNotFound(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model produced a non-finite score: {0}")]
    NonFinite(f32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces a similarity score for a (live, reference) image pair.
pub trait Scorer {
    fn score(&mut self, live: &FaceImage, reference: &FaceImage) -> Result<f32, ScorerError>;
}

/// Siamese-network scorer backed by an ONNX Runtime session.
pub struct SiameseScorer {
    session: Session,
}

impl SiameseScorer {
    /// Load the Siamese ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, ScorerError> {
        if !Path::new(model_path).exists() {
            return Err(ScorerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded Siamese model"
        );

        let num_inputs = session.inputs().len();
        if num_inputs != SIAMESE_INPUT_COUNT {
            return Err(ScorerError::InvalidModel(format!(
                "expected {SIAMESE_INPUT_COUNT} inputs (live image, reference image), got {num_inputs}"
            )));
        }
        if session.outputs().is_empty() {
            return Err(ScorerError::InvalidModel("model has no outputs".into()));
        }

        Ok(Self { session })
    }
}

impl Scorer for SiameseScorer {
    fn score(&mut self, live: &FaceImage, reference: &FaceImage) -> Result<f32, ScorerError> {
        let outputs = self.session.run(ort::inputs![
            TensorRef::from_array_view(live.batch_view())?,
            TensorRef::from_array_view(reference.batch_view())?,
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScorerError::InferenceFailed(format!("score extraction: {e}")))?;

        let score = data
            .first()
            .copied()
            .ok_or_else(|| ScorerError::InferenceFailed("model returned an empty tensor".into()))?;

        check_finite(score)
    }
}

fn check_finite(score: f32) -> Result<f32, ScorerError> {
    if score.is_finite() {
        Ok(score)
    } else {
        Err(ScorerError::NonFinite(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model() {
        let result = SiameseScorer::load("/nonexistent/siamesemodel.onnx", 1);
        assert!(matches!(result, Err(ScorerError::ModelNotFound(_))));
    }

    #[test]
    fn test_check_finite_accepts_scores() {
        assert_eq!(check_finite(0.995).unwrap(), 0.995);
        assert_eq!(check_finite(0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_check_finite_rejects_nan_and_inf() {
        assert!(matches!(check_finite(f32::NAN), Err(ScorerError::NonFinite(_))));
        assert!(matches!(
            check_finite(f32::INFINITY),
            Err(ScorerError::NonFinite(_))
        ));
    }
}
