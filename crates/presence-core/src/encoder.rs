//! Frame → embeddings: detection followed by per-face embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

/// Faces beyond this many (lowest confidence first) are not embedded.
const MAX_FACES_PER_FRAME: usize = 8;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("invalid frame: {width}x{height} RGB needs {expected} bytes, got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// One detected face with its embedding.
#[derive(Debug, Clone)]
pub struct FaceEncoding {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Detects faces in a packed RGB frame and embeds each of them.
///
/// An empty result means no face was found; that is not an error.
pub trait FaceEncoder: Send {
    fn encode(&mut self, rgb: &[u8], width: u32, height: u32)
        -> Result<Vec<FaceEncoding>, EncoderError>;
}

/// Reject zero-sized frames and buffers that do not hold `width * height` RGB pixels.
pub fn validate_frame(rgb: &[u8], width: u32, height: u32) -> Result<(), EncoderError> {
    let expected = width as usize * height as usize * 3;
    if width == 0 || height == 0 || rgb.len() != expected {
        return Err(EncoderError::InvalidFrame {
            width,
            height,
            expected,
            actual: rgb.len(),
        });
    }
    Ok(())
}

/// SCRFD + ArcFace encoder.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceEncoding>, EncoderError> {
        validate_frame(rgb, width, height)?;

        let faces = self.detector.detect(rgb, width, height)?;
        let mut encodings = Vec::with_capacity(faces.len().min(MAX_FACES_PER_FRAME));

        for face in faces.into_iter().take(MAX_FACES_PER_FRAME) {
            match self.recognizer.extract(rgb, width, height, &face) {
                Ok(embedding) => encodings.push(FaceEncoding {
                    bbox: face,
                    embedding,
                }),
                Err(RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks) => {
                    tracing::debug!(
                        confidence = face.confidence,
                        "skipping face without usable landmarks"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(encodings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_frame_ok() {
        let rgb = vec![0u8; 4 * 2 * 3];
        assert!(validate_frame(&rgb, 4, 2).is_ok());
    }

    #[test]
    fn test_validate_frame_wrong_length() {
        let rgb = vec![0u8; 4 * 2];
        let err = validate_frame(&rgb, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            EncoderError::InvalidFrame {
                expected: 24,
                actual: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_frame_zero_size() {
        assert!(validate_frame(&[], 0, 0).is_err());
    }

    #[test]
    fn test_load_missing_models() {
        let err = OnnxFaceEncoder::load("/nonexistent/det.onnx", "/nonexistent/rec.onnx");
        assert!(matches!(
            err,
            Err(EncoderError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
