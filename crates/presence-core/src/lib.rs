//! presence-core: Face detection, embedding and identity matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime on the CPU, and a Euclidean nearest-neighbour roster
//! to turn embeddings into employee identities.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::FaceDetector;
pub use encoder::{EncoderError, FaceEncoder, FaceEncoding, OnnxFaceEncoder};
pub use matcher::{MatchResult, Matcher, Nearest, Roster, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, Identity, KnownIdentity, UNKNOWN_LABEL};

/// SCRFD detection model file name.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/presence/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence/models")
}
