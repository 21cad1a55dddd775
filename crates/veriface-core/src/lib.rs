//! veriface-core — Face verification engine.
//!
//! Preprocesses face images into fixed 105x105 RGB tensors, scores
//! live/reference pairs with a Siamese network running via ONNX Runtime,
//! and aggregates the scores into a verified/unverified decision.

pub mod preprocess;
pub mod reference;
pub mod scorer;
pub mod types;
pub mod verify;

pub use preprocess::{FaceImage, PreprocessError, FACE_IMAGE_SIZE};
pub use reference::{ReferenceError, ReferenceImage, ReferenceSet};
pub use scorer::{Scorer, ScorerError, SiameseScorer};
pub use types::{Thresholds, Verification};
pub use verify::{decide, verify, VerifyError};
