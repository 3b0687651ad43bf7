//! Build the known-identity roster from a directory of reference photos.

use crate::snapshot::sanitize_employee_id;
use presence_core::{FaceEncoder, KnownIdentity, Roster};
use presence_hw::{Frame, FrameError};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cannot read roster directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid reference owner: {0}")]
    InvalidOwner(String),
    #[error("cannot decode uploaded image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot save reference image {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A reference photo and the employee name taken from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub name: String,
    pub path: PathBuf,
}

/// Employee name from a reference file: the stem up to the first `_`.
///
/// `Alice_1.jpg` and `Alice_2.jpg` both map to `Alice`.
pub fn name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.split('_').next().unwrap_or(stem).trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Image files in `dir`, sorted by file name so roster order is stable.
pub fn list_references(dir: &Path) -> Result<Vec<ReferenceImage>, RosterError> {
    let io_err = |source| RosterError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut refs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        match name_from_path(&path) {
            Some(name) => refs.push(ReferenceImage { name, path }),
            None => tracing::warn!(path = %path.display(), "reference file has no usable name"),
        }
    }
    refs.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(refs)
}

/// File stem of an employee's managed reference photo: `<name>_<id>`.
///
/// The name must survive [`name_from_path`], so it may not contain `_`.
pub fn reference_stem(name: &str, email: &str) -> Result<String, RosterError> {
    let name = name.trim();
    if name.is_empty() || name.contains(['_', '/', '\\']) {
        return Err(RosterError::InvalidOwner(format!("name {name:?}")));
    }
    let id = sanitize_employee_id(email);
    if id.is_empty() {
        return Err(RosterError::InvalidOwner(format!("e-mail {email:?}")));
    }
    Ok(format!("{name}_{id}"))
}

/// Decode an uploaded photo into an RGB frame.
pub fn decode_upload(bytes: &[u8]) -> Result<Frame, RosterError> {
    let img = image::load_from_memory(bytes)
        .map_err(RosterError::Decode)?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::from_rgb(img.into_raw(), width, height, 0)?)
}

/// Replace every file whose stem is `stem` with `frame`, saved as PNG.
pub fn replace_reference(dir: &Path, stem: &str, frame: &Frame) -> Result<PathBuf, RosterError> {
    let io_err = |source| RosterError::Io {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let old = entry.map_err(io_err)?.path();
        if old.is_file() && old.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            std::fs::remove_file(&old).map_err(io_err)?;
            tracing::debug!(path = %old.display(), "previous reference removed");
        }
    }

    let path = dir.join(format!("{stem}.png"));
    frame
        .to_image()?
        .save_with_format(&path, image::ImageFormat::Png)
        .map_err(|source| RosterError::Save {
            path: path.clone(),
            source,
        })?;
    tracing::info!(path = %path.display(), "reference photo saved");
    Ok(path)
}

/// Encode every reference photo and collect one identity per photo.
///
/// Photos that fail to decode or contain no face are skipped with a warning.
/// An empty roster is valid: every face then classifies as unknown.
pub fn build_roster(encoder: &mut dyn FaceEncoder, dir: &Path) -> Result<Roster, RosterError> {
    let refs = list_references(dir)?;
    let mut identities = Vec::with_capacity(refs.len());

    for reference in &refs {
        let img = match image::open(&reference.path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(
                    path = %reference.path.display(),
                    error = %e,
                    "cannot decode reference image"
                );
                continue;
            }
        };

        let faces = match encoder.encode(img.as_raw(), img.width(), img.height()) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(
                    path = %reference.path.display(),
                    error = %e,
                    "cannot encode reference image"
                );
                continue;
            }
        };

        match faces.into_iter().next() {
            Some(face) => identities.push(KnownIdentity::new(&reference.name, face.embedding)),
            None => {
                tracing::warn!(
                    path = %reference.path.display(),
                    "no face in reference image; skipped"
                )
            }
        }
    }

    let skipped = refs.len() - identities.len();
    if identities.is_empty() {
        tracing::warn!(dir = %dir.display(), "roster is empty; every face will be unknown");
    }
    tracing::info!(dir = %dir.display(), identities = identities.len(), skipped, "roster built");

    Ok(Roster::new(identities))
}
