use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod attendance;
mod clock;
mod config;
mod dbus_interface;
mod engine;
mod preview;
mod roster;
mod service;
mod snapshot;
mod store;
#[cfg(test)]
mod testing;
mod tracker;

use clock::{Clock, SystemClock};
use presence_core::OnnxFaceEncoder;
use presence_hw::Camera;
use store::{AttendanceStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");
    let config = config::Config::from_env();

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        camera.discard_frames(config.warmup_frames);
    }

    let mut encoder =
        OnnxFaceEncoder::load(&config.scrfd_model_path(), &config.arcface_model_path())
            .context("loading face models")?;

    std::fs::create_dir_all(&config.roster_dir)
        .with_context(|| format!("creating {}", config.roster_dir.display()))?;
    let roster = roster::build_roster(&mut encoder, &config.roster_dir)?;

    let engine = engine::spawn_engine(
        Box::new(camera),
        Box::new(encoder),
        roster,
        config.match_threshold,
    )?;

    let store: Arc<dyn AttendanceStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = tracker::SessionRegistry::new(
        engine.clone(),
        store.clone(),
        clock.clone(),
        tracker::SettingsSource::File(config.monitoring_file.clone()),
    );
    let snapshots = config
        .save_snapshots
        .then(|| snapshot::SnapshotWriter::new(&config.snapshot_dir));

    let service = Arc::new(service::AttendanceService::new(
        engine.clone(),
        store,
        clock,
        sessions,
        snapshots,
        config.roster_dir.clone(),
    ));

    if let Some(path) = config.preview_path.clone() {
        tokio::spawn(preview::run_preview(engine.clone(), path));
    }

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::PresenceService::new(service.clone()),
        )?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "presenced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");
    service.shutdown();

    Ok(())
}
