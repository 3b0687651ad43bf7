//! Check-in / check-out snapshot files.

use chrono::NaiveDateTime;
use presence_hw::{Frame, FrameError};
use std::path::PathBuf;
use thiserror::Error;

const SNAPSHOT_JPEG_QUALITY: u8 = 90;
const STRIPPED_PUNCTUATION: &str = r#"!()-[]{};:'"\,<>./?@#$%^&*_~"#;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding: {0}")]
    Encode(#[from] FrameError),
    #[error("no usable employee identifier in {0:?}")]
    InvalidEmployeeId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEvent {
    CheckIn,
    CheckOut,
}

impl SnapshotEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotEvent::CheckIn => "check_in",
            SnapshotEvent::CheckOut => "check_out",
        }
    }
}

/// E-mail local part with punctuation removed, used as the directory and file prefix.
pub fn sanitize_employee_id(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !STRIPPED_PUNCTUATION.contains(*c) && !c.is_whitespace())
        .collect()
}

/// Writes snapshots under `<root>/<employee>/`.
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/<id>/<id>_<YYYY-MM-DD>_time-<HH-MM-SS>_<event>.jpg`
    pub fn path_for(
        &self,
        email: &str,
        event: SnapshotEvent,
        at: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        let id = sanitize_employee_id(email);
        if id.is_empty() {
            return Err(SnapshotError::InvalidEmployeeId(email.to_string()));
        }
        let file = format!(
            "{id}_{}_time-{}_{}.jpg",
            at.format("%Y-%m-%d"),
            at.format("%H-%M-%S"),
            event.as_str()
        );
        Ok(self.root.join(&id).join(file))
    }

    pub fn write(
        &self,
        email: &str,
        event: SnapshotEvent,
        at: NaiveDateTime,
        frame: &Frame,
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.path_for(email, event, at)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let jpeg = frame.encode_jpeg(SNAPSHOT_JPEG_QUALITY)?;
        std::fs::write(&path, jpeg)?;
        tracing::info!(path = %path.display(), event = event.as_str(), "snapshot saved");
        Ok(path)
    }
}
