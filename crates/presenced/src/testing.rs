//! In-process fakes for camera and encoder.
//!
//! A frame's first byte names who is in front of the camera: 0 is nobody,
//! 1 is Alice, 2 is Bob, anything else is a stranger.

use presence_core::{
    BoundingBox, EncoderError, Embedding, FaceEncoder, FaceEncoding, KnownIdentity, Roster,
};
use presence_hw::{CameraError, Frame, FrameSource};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

pub const NOBODY: u8 = 0;
pub const ALICE: u8 = 1;
pub const BOB: u8 = 2;
pub const STRANGER: u8 = 9;

const SIDE: u32 = 4;

/// Controls what the fake camera shows next.
#[derive(Clone, Default)]
pub struct Scene {
    subject: Arc<AtomicU8>,
    broken: Arc<AtomicBool>,
}

impl Scene {
    pub fn show(&self, subject: u8) {
        self.subject.store(subject, Ordering::SeqCst);
    }

    pub fn break_camera(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn camera(&self) -> SceneCamera {
        SceneCamera {
            scene: self.clone(),
            sequence: 0,
        }
    }
}

pub struct SceneCamera {
    scene: Scene,
    sequence: u32,
}

impl FrameSource for SceneCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.scene.broken.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("unplugged".into()));
        }
        self.sequence += 1;
        let subject = self.scene.subject.load(Ordering::SeqCst);
        Frame::from_rgb(vec![subject; (SIDE * SIDE * 3) as usize], SIDE, SIDE, self.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

/// One face per non-empty frame, embedded as `[subject, 0]`.
pub struct SubjectEncoder;

impl FaceEncoder for SubjectEncoder {
    fn encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceEncoding>, EncoderError> {
        presence_core::encoder::validate_frame(rgb, width, height)?;
        let subject = rgb[0];
        if subject == NOBODY {
            return Ok(Vec::new());
        }
        Ok(vec![FaceEncoding {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: width as f32 - 1.0,
                height: height as f32 - 1.0,
                confidence: 0.99,
                landmarks: None,
            },
            embedding: embedding_for(subject),
        }])
    }
}

pub fn embedding_for(subject: u8) -> Embedding {
    Embedding::new(vec![subject as f32, 0.0])
}

pub fn roster() -> Roster {
    Roster::new(vec![
        KnownIdentity::new("Alice", embedding_for(ALICE)),
        KnownIdentity::new("Bob", embedding_for(BOB)),
    ])
}

/// Write a small PNG whose pixels all carry `subject`.
pub fn write_reference(dir: &Path, file: &str, subject: u8) {
    image::RgbImage::from_pixel(SIDE, SIDE, image::Rgb([subject; 3]))
        .save(dir.join(file))
        .unwrap();
}
