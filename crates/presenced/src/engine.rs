use crate::roster::{self, RosterError};
use presence_core::{BoundingBox, EncoderError, FaceEncoder, Identity, MatchResult, Matcher, Roster};
use presence_hw::{CameraError, Frame, FrameSource};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const KNOWN_COLOR: [u8; 3] = [0, 200, 0];
const UNKNOWN_COLOR: [u8; 3] = [220, 0, 0];
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("roster error: {0}")]
    Roster(#[from] RosterError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One classified face in a frame.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    pub identity: Identity,
    pub distance: Option<f32>,
    pub bbox: BoundingBox,
}

/// A frame with every detected face boxed and labeled.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub faces: Vec<RecognitionResult>,
}

/// Where a new reference photo went and how large the roster is now.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoUpdate {
    pub path: PathBuf,
    pub roster_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub roster_size: usize,
    pub roster_names: Vec<String>,
    pub frames_read: u64,
    pub frame_errors: u64,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Identify {
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    Recognize {
        reply: oneshot::Sender<Result<AnnotatedFrame, EngineError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<Frame, EngineError>>,
    },
    ReloadRoster {
        dir: PathBuf,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    UpdatePhoto {
        dir: PathBuf,
        stem: String,
        upload: Option<Frame>,
        reply: oneshot::Sender<Result<PhotoUpdate, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Read one frame and classify its most confident face.
    /// No face at all classifies as unknown.
    pub async fn identify(&self) -> Result<MatchResult, EngineError> {
        self.request(|reply| EngineRequest::Identify { reply }).await?
    }

    /// Read one frame, classify every face and draw labeled boxes.
    pub async fn recognize(&self) -> Result<AnnotatedFrame, EngineError> {
        self.request(|reply| EngineRequest::Recognize { reply }).await?
    }

    /// Read one unannotated frame.
    pub async fn capture(&self) -> Result<Frame, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    /// Rebuild the roster from `dir` and swap it in. Returns the new size.
    ///
    /// On failure the previous roster stays in place.
    pub async fn reload_roster(&self, dir: PathBuf) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::ReloadRoster { dir, reply })
            .await?
    }

    /// Store a new reference photo as `<dir>/<stem>.png`, replacing any
    /// previous file with that stem, then rebuild the roster from `dir`.
    ///
    /// Without an upload the photo is taken from the camera. A photo with no
    /// face is refused and nothing on disk changes.
    pub async fn update_photo(
        &self,
        dir: PathBuf,
        stem: String,
        upload: Option<Frame>,
    ) -> Result<PhotoUpdate, EngineError> {
        self.request(|reply| EngineRequest::UpdatePhoto {
            dir,
            stem,
            upload,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Continuous per-frame recognition.
    pub fn stream(&self) -> RecognitionStream {
        RecognitionStream {
            engine: self.clone(),
            finished: false,
        }
    }
}

/// Pull-based sequence of annotated frames.
///
/// A failed frame read yields an error item and the stream carries on; once
/// the engine shuts down the stream ends and never restarts.
pub struct RecognitionStream {
    engine: EngineHandle,
    finished: bool,
}

impl RecognitionStream {
    pub async fn next(&mut self) -> Option<Result<AnnotatedFrame, EngineError>> {
        if self.finished {
            return None;
        }
        match self.engine.recognize().await {
            Err(EngineError::ChannelClosed) => {
                self.finished = true;
                None
            }
            item => Some(item),
        }
    }
}

/// State owned by the engine thread. Only this thread touches the camera
/// and the inference sessions.
struct Engine {
    source: Box<dyn FrameSource>,
    encoder: Box<dyn FaceEncoder>,
    roster: Roster,
    threshold: f32,
    frames_read: u64,
    frame_errors: u64,
}

impl Engine {
    fn read_frame(&mut self) -> Result<Frame, EngineError> {
        match self.source.read_frame() {
            Ok(frame) => {
                self.frames_read += 1;
                Ok(frame)
            }
            Err(e) => {
                self.frame_errors += 1;
                tracing::warn!(error = %e, "frame read failed");
                Err(e.into())
            }
        }
    }

    /// Faces come back in detector order, most confident first.
    fn classify(&mut self, frame: &Frame) -> Result<Vec<RecognitionResult>, EngineError> {
        let faces = self.encoder.encode(&frame.data, frame.width, frame.height)?;
        Ok(faces
            .into_iter()
            .map(|face| {
                let matched = self.roster.identify(&face.embedding, self.threshold);
                RecognitionResult {
                    identity: matched.identity,
                    distance: matched.distance,
                    bbox: face.bbox,
                }
            })
            .collect())
    }

    fn identify(&mut self) -> Result<MatchResult, EngineError> {
        let frame = self.read_frame()?;
        let faces = self.classify(&frame)?;
        let result = faces
            .into_iter()
            .next()
            .map(|face| MatchResult {
                identity: face.identity,
                distance: face.distance,
            })
            .unwrap_or_else(MatchResult::unknown);
        tracing::debug!(identity = %result.identity, distance = ?result.distance, "identify");
        Ok(result)
    }

    fn recognize(&mut self) -> Result<AnnotatedFrame, EngineError> {
        let mut frame = self.read_frame()?;
        let faces = self.classify(&frame)?;
        for face in &faces {
            let color = if face.identity.is_known() {
                KNOWN_COLOR
            } else {
                UNKNOWN_COLOR
            };
            let b = &face.bbox;
            frame.draw_rect(b.x, b.y, b.width, b.height, color, BOX_THICKNESS);
        }
        Ok(AnnotatedFrame { frame, faces })
    }

    fn reload_roster(&mut self, dir: &Path) -> Result<usize, EngineError> {
        let roster = roster::build_roster(self.encoder.as_mut(), dir)?;
        let size = roster.len();
        self.roster = roster;
        tracing::info!(size, "roster swapped");
        Ok(size)
    }

    fn update_photo(
        &mut self,
        dir: &Path,
        stem: &str,
        upload: Option<Frame>,
    ) -> Result<PhotoUpdate, EngineError> {
        let frame = match upload {
            Some(frame) => frame,
            None => self.read_frame()?,
        };
        let faces = self.encoder.encode(&frame.data, frame.width, frame.height)?;
        if faces.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }
        if faces.len() > 1 {
            tracing::warn!(faces = faces.len(), "several faces in new reference photo");
        }

        let path = roster::replace_reference(dir, stem, &frame)?;
        let roster_size = self.reload_roster(dir)?;
        Ok(PhotoUpdate { path, roster_size })
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            roster_size: self.roster.len(),
            roster_names: self.roster.names().into_iter().map(String::from).collect(),
            frames_read: self.frames_read,
            frame_errors: self.frame_errors,
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        // A dropped receiver only means the caller gave up waiting.
        match req {
            EngineRequest::Identify { reply } => {
                let _ = reply.send(self.identify());
            }
            EngineRequest::Recognize { reply } => {
                let _ = reply.send(self.recognize());
            }
            EngineRequest::Capture { reply } => {
                let _ = reply.send(self.read_frame());
            }
            EngineRequest::ReloadRoster { dir, reply } => {
                let _ = reply.send(self.reload_roster(&dir));
            }
            EngineRequest::UpdatePhoto {
                dir,
                stem,
                upload,
                reply,
            } => {
                let _ = reply.send(self.update_photo(&dir, &stem, upload));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the frame source and encoder for its whole life and
/// serves requests one at a time; it exits when every handle is dropped.
pub fn spawn_engine(
    source: Box<dyn FrameSource>,
    encoder: Box<dyn FaceEncoder>,
    roster: Roster,
    threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    tracing::info!(roster = roster.len(), threshold, "starting engine");
    let mut engine = Engine {
        source,
        encoder,
        roster,
        threshold,
        frames_read: 0,
        frame_errors: 0,
    };

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
