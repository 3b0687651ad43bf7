//! Attendance desk operations: identity check, state transition, snapshot
//! and time-tracking session control.

use crate::attendance::{Attendance, AttendanceState};
use crate::clock::Clock;
use crate::engine::{EngineError, EngineHandle, EngineStatus, PhotoUpdate, RecognitionResult};
use crate::roster::{self, RosterError};
use crate::snapshot::{SnapshotEvent, SnapshotWriter};
use crate::store::{AttendanceStore, StoreError};
use crate::tracker::{format_hms, SessionRegistry, TimeTotals};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// What the desk tells the employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeskReply {
    pub success: bool,
    pub status: String,
}

impl DeskReply {
    fn new(success: bool, status: impl Into<String>) -> Self {
        Self {
            success,
            status: status.into(),
        }
    }

    fn not_you(claimed: &str) -> Self {
        Self::new(
            false,
            format!("You are not {claimed}!! If you think this is a mistake contact the administrator"),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub active: bool,
    pub total_secs: u64,
    pub idle_secs: u64,
    pub total: String,
    pub idle: String,
}

impl SessionView {
    fn new(active: bool, totals: TimeTotals) -> Self {
        Self {
            active,
            total_secs: totals.total_secs,
            idle_secs: totals.idle_secs,
            total: format_hms(totals.total_secs),
            idle: format_hms(totals.idle_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub version: &'static str,
    pub engine: EngineStatus,
    pub active_sessions: usize,
}

pub struct AttendanceService {
    engine: EngineHandle,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    attendance: Attendance,
    sessions: SessionRegistry,
    snapshots: Option<SnapshotWriter>,
    roster_dir: PathBuf,
    /// Serializes identify + transition + snapshot per request.
    desk: tokio::sync::Mutex<()>,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        sessions: SessionRegistry,
        snapshots: Option<SnapshotWriter>,
        roster_dir: PathBuf,
    ) -> Self {
        Self {
            attendance: Attendance::new(store.clone(), clock.clone()),
            engine,
            store,
            clock,
            sessions,
            snapshots,
            roster_dir,
            desk: tokio::sync::Mutex::new(()),
        }
    }

    /// Check that the person at the camera is `claimed` before they act.
    pub async fn confirm(&self, claimed: &str) -> Result<DeskReply, ServiceError> {
        let seen = self.engine.identify().await?;
        if !seen.identity.is(claimed) {
            tracing::info!(claimed, recognized = %seen.identity, "confirm: identity mismatch");
            return Ok(DeskReply::not_you(claimed));
        }
        Ok(DeskReply::new(true, format!("Hello {claimed}!! , Please Check In")))
    }

    pub async fn check_in(&self, name: &str, email: &str) -> Result<DeskReply, ServiceError> {
        let _desk = self.desk.lock().await;

        let seen = self.engine.identify().await?;
        if !seen.identity.is(name) {
            tracing::info!(
                claimed = name,
                recognized = %seen.identity,
                "check-in refused: identity mismatch"
            );
            return Ok(DeskReply::not_you(name));
        }

        let outcome = self.attendance.check_in(name, email)?;
        if let Some(event) = outcome.snapshot() {
            self.save_snapshot(email, event).await;
        }

        // Tracking runs for the whole checked-in day, including a repeat visit
        // after a daemon restart.
        let today = self.attendance.today();
        if self.attendance.state(email, today)? == AttendanceState::CheckedIn {
            self.sessions.start(name, email, today);
        }

        Ok(DeskReply::new(outcome.is_success(), outcome.status()))
    }

    pub async fn check_out(&self, name: &str, email: &str) -> Result<DeskReply, ServiceError> {
        let _desk = self.desk.lock().await;

        let seen = self.engine.identify().await?;
        if !seen.identity.is(name) {
            tracing::info!(
                claimed = name,
                recognized = %seen.identity,
                "check-out refused: identity mismatch"
            );
            return Ok(DeskReply::not_you(name));
        }

        let outcome = self.attendance.check_out(email)?;
        if let Some(event) = outcome.snapshot() {
            self.save_snapshot(email, event).await;
        }
        if outcome.is_success() {
            self.sessions.stop(email, self.attendance.today());
        }

        Ok(DeskReply::new(outcome.is_success(), outcome.status()))
    }

    /// Resume time tracking for someone already checked in today.
    /// Returns false if they are not in the checked-in state.
    pub fn start_session(&self, name: &str, email: &str) -> Result<bool, ServiceError> {
        let today = self.attendance.today();
        if self.attendance.state(email, today)? != AttendanceState::CheckedIn {
            return Ok(false);
        }
        self.sessions.start(name, email, today);
        Ok(true)
    }

    /// Today's totals: live if a session runs, otherwise as persisted.
    pub fn session_status(&self, email: &str) -> Result<Option<SessionView>, ServiceError> {
        let today = self.attendance.today();
        if let Some(totals) = self.sessions.totals(email, today) {
            return Ok(Some(SessionView::new(true, totals)));
        }
        Ok(self.store.find_time(email, today)?.map(|record| {
            SessionView::new(
                false,
                TimeTotals {
                    total_secs: record.total_secs,
                    idle_secs: record.idle_secs,
                },
            )
        }))
    }

    pub async fn recognize(&self) -> Result<Vec<RecognitionResult>, ServiceError> {
        Ok(self.engine.recognize().await?.faces)
    }

    pub async fn reload_roster(&self) -> Result<usize, ServiceError> {
        Ok(self.engine.reload_roster(self.roster_dir.clone()).await?)
    }

    /// Replace the employee's reference photo and re-encode the roster.
    ///
    /// `upload` is an encoded image; without one the camera takes the photo.
    pub async fn update_photo(
        &self,
        name: &str,
        email: &str,
        upload: Option<&[u8]>,
    ) -> Result<PhotoUpdate, ServiceError> {
        let stem = roster::reference_stem(name, email)?;
        let upload = upload.map(roster::decode_upload).transpose()?;

        let _desk = self.desk.lock().await;
        let update = self
            .engine
            .update_photo(self.roster_dir.clone(), stem, upload)
            .await?;
        tracing::info!(name, email, path = %update.path.display(), "reference photo updated");
        Ok(update)
    }

    pub async fn status(&self) -> Result<DaemonStatus, ServiceError> {
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION"),
            engine: self.engine.status().await?,
            active_sessions: self.sessions.active().len(),
        })
    }

    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }

    /// Snapshot failures never undo a transition that already happened.
    async fn save_snapshot(&self, email: &str, event: SnapshotEvent) {
        let Some(writer) = &self.snapshots else {
            return;
        };
        let frame = match self.engine.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    email,
                    event = event.as_str(),
                    error = %e,
                    "snapshot capture failed"
                );
                return;
            }
        };
        if let Err(e) = writer.write(email, event, self.clock.now(), &frame) {
            tracing::warn!(email, event = event.as_str(), error = %e, "snapshot not saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::MonitoringSettings;
    use crate::engine::spawn_engine;
    use crate::store::SqliteStore;
    use crate::testing::{self, Scene, SubjectEncoder, ALICE, BOB, STRANGER};
    use crate::tracker::SettingsSource;
    use std::time::Duration;

    const ALICE_EMAIL: &str = "alice@corp.com";

    struct Desk {
        service: AttendanceService,
        scene: Scene,
        clock: Arc<FixedClock>,
        store: Arc<SqliteStore>,
        snapshots: tempfile::TempDir,
    }

    fn desk() -> Desk {
        let scene = Scene::default();
        let engine = spawn_engine(
            Box::new(scene.camera()),
            Box::new(SubjectEncoder),
            testing::roster(),
            presence_core::DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::at(2024, 3, 14, 9, 0, 0));
        let sessions = SessionRegistry::with_period(
            engine.clone(),
            store.clone(),
            clock.clone(),
            SettingsSource::Fixed(MonitoringSettings::default()),
            Duration::from_millis(5),
        );
        let snapshots = tempfile::tempdir().unwrap();
        let service = AttendanceService::new(
            engine,
            store.clone(),
            clock.clone(),
            sessions,
            Some(SnapshotWriter::new(snapshots.path())),
            snapshots.path().join("no-roster-here"),
        );
        Desk {
            service,
            scene,
            clock,
            store,
            snapshots,
        }
    }

    fn snapshot_count(desk: &Desk) -> usize {
        std::fs::read_dir(desk.snapshots.path().join("alice"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_confirm() {
        let desk = desk();
        desk.scene.show(ALICE);
        let reply = desk.service.confirm("Alice").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.status, "Hello Alice!! , Please Check In");

        desk.scene.show(STRANGER);
        let reply = desk.service.confirm("Alice").await.unwrap();
        assert!(!reply.success);
        assert!(reply.status.starts_with("You are not Alice!!"));
    }

    #[tokio::test]
    async fn test_check_in_flow() {
        let desk = desk();
        desk.scene.show(ALICE);

        let reply = desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        assert!(reply.success);
        assert!(reply.status.contains("Successfully Checked In at 09:00:00"));
        assert_eq!(snapshot_count(&desk), 1);
        assert!(desk.service.session_status(ALICE_EMAIL).unwrap().unwrap().active);

        desk.clock.set(9, 5, 0);
        let reply = desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        assert!(reply.success);
        assert!(reply.status.contains("Already Checked in at 09:00:00"));
        assert_eq!(snapshot_count(&desk), 1);

        desk.service.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_person_changes_nothing() {
        let desk = desk();
        desk.scene.show(BOB);

        let reply = desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        assert!(!reply.success);
        assert!(reply.status.contains("You are not Alice"));
        let today = desk.clock.now().date();
        assert!(desk.store.find_attendance(ALICE_EMAIL, today).unwrap().is_none());
        assert_eq!(snapshot_count(&desk), 0);
        assert!(desk.service.session_status(ALICE_EMAIL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_check_out_flow_stops_session() {
        let desk = desk();
        desk.scene.show(ALICE);

        let reply = desk.service.check_out("Alice", ALICE_EMAIL).await.unwrap();
        assert_eq!(reply.status, "You Have not Checked In Yet");

        desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        desk.clock.set(17, 0, 0);
        let reply = desk.service.check_out("Alice", ALICE_EMAIL).await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.status, "Successfully Checked Out at 17:00:00");
        assert_eq!(snapshot_count(&desk), 2);

        let view = desk.service.session_status(ALICE_EMAIL).unwrap().unwrap();
        assert!(!view.active);

        let reply = desk.service.check_out("Alice", ALICE_EMAIL).await.unwrap();
        assert_eq!(reply.status, "You Already Checked Out at 17:00:00");
        assert!(!desk.service.start_session("Alice", ALICE_EMAIL).unwrap());
    }

    #[tokio::test]
    async fn test_camera_failure_is_an_error() {
        let desk = desk();
        desk.scene.break_camera(true);
        assert!(matches!(
            desk.service.check_in("Alice", ALICE_EMAIL).await,
            Err(ServiceError::Engine(EngineError::Camera(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_session_requires_check_in() {
        let desk = desk();
        assert!(!desk.service.start_session("Alice", ALICE_EMAIL).unwrap());

        desk.scene.show(ALICE);
        desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        desk.service.shutdown();
        assert!(desk.service.start_session("Alice", ALICE_EMAIL).unwrap());
        assert_eq!(desk.service.status().await.unwrap().active_sessions, 1);
        desk.service.shutdown();
    }

    #[tokio::test]
    async fn test_reload_with_missing_dir_fails() {
        let desk = desk();
        assert!(desk.service.reload_roster().await.is_err());
        desk.scene.show(ALICE);
        let faces = desk.service.recognize().await.unwrap();
        assert!(faces[0].identity.is("Alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simultaneous_check_ins_record_once() {
        let desk = desk();
        desk.scene.show(ALICE);

        let (a, b) = tokio::join!(
            desk.service.check_in("Alice", ALICE_EMAIL),
            desk.service.check_in("Alice", ALICE_EMAIL),
        );
        let replies = [a.unwrap(), b.unwrap()];

        assert!(replies.iter().all(|r| r.success));
        let fresh = replies.iter().filter(|r| r.status.contains("Successfully Checked In")).count();
        let repeat = replies.iter().filter(|r| r.status.contains("Already Checked in")).count();
        assert_eq!((fresh, repeat), (1, 1));

        assert_eq!(snapshot_count(&desk), 1);
        let record = desk.store.find_attendance(ALICE_EMAIL, desk.clock.now().date()).unwrap();
        assert!(record.is_some_and(|r| !r.checked_out));
        assert_eq!(desk.service.status().await.unwrap().active_sessions, 1);
        desk.service.shutdown();
    }

    #[tokio::test]
    async fn test_session_does_not_outlive_its_day() {
        let desk = desk();
        desk.clock.set(23, 59, 0);
        desk.scene.show(ALICE);
        desk.service.check_in("Alice", ALICE_EMAIL).await.unwrap();
        let day = desk.clock.now().date();
        tokio::time::sleep(Duration::from_millis(30)).await;

        desk.clock.next_day();
        let reply = desk.service.check_out("Alice", ALICE_EMAIL).await.unwrap();
        assert_eq!(reply.status, "You Have not Checked In Yet");

        let mut active = usize::MAX;
        for _ in 0..400 {
            active = desk.service.status().await.unwrap().active_sessions;
            if active == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(active, 0);

        let total = desk.store.find_time(ALICE_EMAIL, day).unwrap().unwrap().total_secs;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(desk.store.find_time(ALICE_EMAIL, day).unwrap().unwrap().total_secs, total);
    }

    #[tokio::test]
    async fn test_update_photo() {
        let desk = desk();
        let roster_dir = desk.snapshots.path().join("no-roster-here");

        desk.scene.show(STRANGER);
        let update = desk.service.update_photo("Alice", ALICE_EMAIL, None).await.unwrap();
        assert_eq!(update.path, roster_dir.join("Alice_alice.png"));
        assert_eq!(update.roster_size, 1);
        assert!(desk.service.confirm("Alice").await.unwrap().success);

        let mut png = Vec::new();
        image::RgbImage::from_pixel(4, 4, image::Rgb([BOB; 3]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let update = desk.service.update_photo("Alice", ALICE_EMAIL, Some(&png)).await.unwrap();
        assert_eq!(update.roster_size, 1);
        assert_eq!(std::fs::read_dir(&roster_dir).unwrap().count(), 1);

        desk.scene.show(BOB);
        assert!(desk.service.confirm("Alice").await.unwrap().success);
        desk.scene.show(STRANGER);
        assert!(!desk.service.confirm("Alice").await.unwrap().success);

        assert!(matches!(
            desk.service.update_photo("Al_ice", ALICE_EMAIL, None).await,
            Err(ServiceError::Roster(RosterError::InvalidOwner(_)))
        ));
    }
}
