//! Keeps the latest annotated frame on disk for a viewer to poll.

use crate::engine::EngineHandle;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PREVIEW_JPEG_QUALITY: u8 = 80;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drive the recognition stream until the engine goes away, replacing
/// `path` with each new annotated frame.
pub async fn run_preview(engine: EngineHandle, path: PathBuf) {
    tracing::info!(path = %path.display(), "live preview enabled");
    let mut stream = engine.stream();

    while let Some(item) = stream.next().await {
        let annotated = match item {
            Ok(annotated) => annotated,
            Err(e) => {
                tracing::debug!(error = %e, "preview frame skipped");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        let jpeg = match annotated.frame.encode_jpeg(PREVIEW_JPEG_QUALITY) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!(error = %e, "preview encode failed");
                continue;
            }
        };
        if let Err(e) = replace_file(&path, &jpeg).await {
            tracing::warn!(path = %path.display(), error = %e, "preview write failed");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    tracing::info!("live preview stopped");
}

/// Write beside the target and rename so readers never see a torn file.
async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testing::{self, Scene, SubjectEncoder, ALICE};

    #[tokio::test]
    async fn test_preview_writes_jpeg() {
        let scene = Scene::default();
        scene.show(ALICE);
        let engine = spawn_engine(
            Box::new(scene.camera()),
            Box::new(SubjectEncoder),
            testing::roster(),
            presence_core::DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");

        let task = tokio::spawn(run_preview(engine, path.clone()));
        for _ in 0..200 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
