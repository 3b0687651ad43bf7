use crate::service::{AttendanceService, ServiceError};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.presence.Attendance1";
pub const OBJECT_PATH: &str = "/org/presence/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.presence.Attendance1
/// Object path: /org/presence/Attendance1
pub struct PresenceService {
    service: Arc<AttendanceService>,
}

impl PresenceService {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }
}

fn failed(e: ServiceError) -> zbus::fdo::Error {
    tracing::warn!(error = %e, "request failed");
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.presence.Attendance1")]
impl PresenceService {
    /// Check that the person at the camera is `name`. Returns (success, status).
    #[zbus(out_args("success", "status"))]
    async fn confirm(&self, name: &str) -> zbus::fdo::Result<(bool, String)> {
        tracing::info!(name, "confirm requested");
        let reply = self.service.confirm(name).await.map_err(failed)?;
        Ok((reply.success, reply.status))
    }

    /// Verify identity and check in for today. Returns (success, status).
    #[zbus(out_args("success", "status"))]
    async fn check_in(&self, name: &str, email: &str) -> zbus::fdo::Result<(bool, String)> {
        tracing::info!(name, email, "check-in requested");
        let reply = self.service.check_in(name, email).await.map_err(failed)?;
        Ok((reply.success, reply.status))
    }

    /// Verify identity and check out for today. Returns (success, status).
    #[zbus(out_args("success", "status"))]
    async fn check_out(&self, name: &str, email: &str) -> zbus::fdo::Result<(bool, String)> {
        tracing::info!(name, email, "check-out requested");
        let reply = self.service.check_out(name, email).await.map_err(failed)?;
        Ok((reply.success, reply.status))
    }

    /// Resume time tracking for an employee already checked in today.
    async fn start_session(&self, name: &str, email: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(name, email, "start_session requested");
        self.service.start_session(name, email).map_err(failed)
    }

    /// Today's total and idle time as JSON, or `null` if never checked in.
    async fn session_status(&self, email: &str) -> zbus::fdo::Result<String> {
        let view = self.service.session_status(email).map_err(failed)?;
        to_json(&view)
    }

    /// Classify every face in one frame. JSON array of results.
    async fn recognize(&self) -> zbus::fdo::Result<String> {
        let faces = self.service.recognize().await.map_err(failed)?;
        to_json(&faces)
    }

    /// Rebuild the roster from the reference image directory.
    async fn reload_roster(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("roster reload requested");
        let size = self.service.reload_roster().await.map_err(failed)?;
        Ok(u32::try_from(size).unwrap_or(u32::MAX))
    }

    /// Take a new reference photo with the camera. JSON `{path, roster_size}`.
    async fn update_photo(&self, name: &str, email: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, email, "photo update requested");
        let update = self.service.update_photo(name, email, None).await.map_err(failed)?;
        to_json(&update)
    }

    /// Use an uploaded image (JPEG, PNG or BMP bytes) as the new reference photo.
    async fn upload_photo(
        &self,
        name: &str,
        email: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, email, bytes = image.len(), "photo upload received");
        let update = self
            .service
            .update_photo(name, email, Some(&image))
            .await
            .map_err(failed)?;
        to_json(&update)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.service.status().await.map_err(failed)?;
        to_json(&status)
    }
}
