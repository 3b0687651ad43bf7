//! Per-second presence accounting for checked-in employees.
//!
//! Each active session owns one [`TimeTracker`] and ticks it once per second
//! from its own task. The in-memory accumulators are authoritative; the store
//! is written every `time_for_saving` seconds and once more when the session
//! stops. A session belongs to one calendar day and ends by itself once
//! that day is over.

use crate::clock::Clock;
use crate::config::MonitoringSettings;
use crate::engine::{EngineError, EngineHandle};
use crate::store::{AttendanceStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Whole seconds as `HH:MM:SS`. Hours do not wrap at 24.
pub fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeTotals {
    pub total_secs: u64,
    pub idle_secs: u64,
}

/// Total and idle accumulators plus the current unrecognized streak.
#[derive(Debug, Clone, Default)]
pub struct TimeTracker {
    totals: TimeTotals,
    unrecognized_streak: u64,
}

impl TimeTracker {
    pub fn totals(&self) -> TimeTotals {
        self.totals
    }

    /// Never let the accumulators fall below what is already persisted.
    pub fn merge(&mut self, persisted: TimeTotals) {
        self.totals.total_secs = self.totals.total_secs.max(persisted.total_secs);
        self.totals.idle_secs = self.totals.idle_secs.max(persisted.idle_secs);
    }

    /// Account one second. Returns true when the totals are due for a flush.
    ///
    /// Idle time accrues once the unrecognized streak exceeds `idle_time`.
    pub fn advance(
        &mut self,
        persisted: TimeTotals,
        recognized: bool,
        settings: &MonitoringSettings,
    ) -> bool {
        self.merge(persisted);
        self.totals.total_secs += 1;

        if recognized {
            self.unrecognized_streak = 0;
        } else {
            self.unrecognized_streak += 1;
            if self.unrecognized_streak > settings.idle_time {
                self.totals.idle_secs += 1;
            }
        }
        self.totals.idle_secs = self.totals.idle_secs.min(self.totals.total_secs);

        self.totals.total_secs % settings.time_for_saving.max(1) == 0
    }
}

/// Where monitoring settings come from when a session starts.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    File(PathBuf),
    Fixed(MonitoringSettings),
}

impl SettingsSource {
    pub fn current(&self) -> MonitoringSettings {
        match self {
            SettingsSource::File(path) => MonitoringSettings::load(path),
            SettingsSource::Fixed(settings) => *settings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub email: String,
    pub date: NaiveDate,
}

/// One employee-day being tracked.
struct Session {
    name: String,
    key: SessionKey,
    settings: MonitoringSettings,
    tracker: TimeTracker,
}

impl Session {
    /// Advance one second and flush if due. `None` while no time-tracking
    /// record exists for the day.
    fn tick(
        &mut self,
        store: &dyn AttendanceStore,
        recognized: bool,
    ) -> Result<Option<TimeTotals>, StoreError> {
        let Some(record) = store.find_time(&self.key.email, self.key.date)? else {
            return Ok(None);
        };
        let persisted = TimeTotals {
            total_secs: record.total_secs,
            idle_secs: record.idle_secs,
        };

        let flush = self.tracker.advance(persisted, recognized, &self.settings);
        let totals = self.tracker.totals();
        if flush {
            self.write(store, totals)?;
            tracing::debug!(
                email = %self.key.email,
                total = totals.total_secs,
                idle = totals.idle_secs,
                "time flushed"
            );
        }
        Ok(Some(totals))
    }

    fn flush(&mut self, store: &dyn AttendanceStore) -> Result<TimeTotals, StoreError> {
        if let Some(record) = store.find_time(&self.key.email, self.key.date)? {
            self.tracker.merge(TimeTotals {
                total_secs: record.total_secs,
                idle_secs: record.idle_secs,
            });
            self.write(store, self.tracker.totals())?;
        }
        Ok(self.tracker.totals())
    }

    fn write(&self, store: &dyn AttendanceStore, totals: TimeTotals) -> Result<bool, StoreError> {
        store.update_time(&self.key.email, self.key.date, totals.total_secs, totals.idle_secs)
    }
}

struct ActiveSession {
    session: Arc<Mutex<Session>>,
    task: JoinHandle<()>,
}

/// Runs at most one ticking task per (email, date).
pub struct SessionRegistry {
    engine: EngineHandle,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    settings: SettingsSource,
    period: Duration,
    sessions: Mutex<HashMap<SessionKey, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        settings: SettingsSource,
    ) -> Self {
        Self::with_period(engine, store, clock, settings, TICK_PERIOD)
    }

    pub fn with_period(
        engine: EngineHandle,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        settings: SettingsSource,
        period: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            clock,
            settings,
            period,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking unless a live session for the key already runs.
    /// Returns whether a new session was started.
    pub fn start(&self, name: &str, email: &str, date: NaiveDate) -> bool {
        let key = SessionKey {
            email: email.to_string(),
            date,
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = sessions.remove(&key) {
            if !previous.task.is_finished() {
                sessions.insert(key, previous);
                return false;
            }
            self.finish(&key, previous);
        }

        let settings = self.settings.current();
        let session = Arc::new(Mutex::new(Session {
            name: name.to_string(),
            key: key.clone(),
            settings,
            tracker: TimeTracker::default(),
        }));
        let task = tokio::spawn(run_session(
            session.clone(),
            self.engine.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.period,
        ));

        tracing::info!(
            name,
            email,
            %date,
            idle_time = settings.idle_time,
            time_for_saving = settings.time_for_saving,
            "time tracking started"
        );
        sessions.insert(key, ActiveSession { session, task });
        true
    }

    /// Stop the session, flushing its totals. `None` if it was not running.
    pub fn stop(&self, email: &str, date: NaiveDate) -> Option<TimeTotals> {
        let key = SessionKey {
            email: email.to_string(),
            date,
        };
        let active = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)?;
        Some(self.finish(&key, active))
    }

    /// Stop every session with a final flush.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (key, active) in drained {
            self.finish(&key, active);
        }
    }

    fn finish(&self, key: &SessionKey, active: ActiveSession) -> TimeTotals {
        active.task.abort();
        let mut session = active.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.flush(self.store.as_ref()) {
            Ok(totals) => {
                tracing::info!(
                    email = %key.email,
                    date = %key.date,
                    total = %format_hms(totals.total_secs),
                    idle = %format_hms(totals.idle_secs),
                    "time tracking stopped"
                );
                totals
            }
            Err(e) => {
                tracing::warn!(email = %key.email, error = %e, "final time flush failed");
                session.tracker.totals()
            }
        }
    }

    /// In-memory totals of a live session.
    pub fn totals(&self, email: &str, date: NaiveDate) -> Option<TimeTotals> {
        let key = SessionKey {
            email: email.to_string(),
            date,
        };
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let active = sessions.get(&key).filter(|s| !s.task.is_finished())?;
        let totals = active
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tracker
            .totals();
        Some(totals)
    }

    pub fn active(&self) -> Vec<SessionKey> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| !s.task.is_finished())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

async fn run_session(
    session: Arc<Mutex<Session>>,
    engine: EngineHandle,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
) {
    let (name, email, date) = {
        let s = session.lock().unwrap_or_else(PoisonError::into_inner);
        (s.name.clone(), s.key.email.clone(), s.key.date)
    };

    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; the first second starts now.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if clock.now().date() > date {
            let (session, store) = (session.clone(), store.clone());
            let flushed = tokio::task::spawn_blocking(move || {
                session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .flush(store.as_ref())
            })
            .await;
            match flushed {
                Ok(Ok(totals)) => tracing::info!(
                    email = %email,
                    %date,
                    total = %format_hms(totals.total_secs),
                    idle = %format_hms(totals.idle_secs),
                    "day is over; time tracking ends"
                ),
                Ok(Err(e)) => tracing::warn!(email = %email, error = %e, "final time flush failed"),
                Err(e) => tracing::warn!(email = %email, error = %e, "final time flush aborted"),
            }
            break;
        }

        let recognized = match engine.identify().await {
            Ok(result) => result.identity.is(&name),
            Err(EngineError::ChannelClosed) => {
                tracing::info!(email = %email, "engine gone; time tracking ends");
                break;
            }
            Err(e) => {
                tracing::warn!(email = %email, error = %e, "presence check failed; tick skipped");
                continue;
            }
        };

        let (session, store) = (session.clone(), store.clone());
        let outcome = tokio::task::spawn_blocking(move || {
            session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tick(store.as_ref(), recognized)
        })
        .await;
        match outcome {
            Ok(Ok(Some(totals))) => tracing::trace!(
                email = %email,
                recognized,
                total = totals.total_secs,
                idle = totals.idle_secs,
                "tick"
            ),
            Ok(Ok(None)) => tracing::debug!(email = %email, "no time-tracking record yet"),
            Ok(Err(e)) => tracing::warn!(email = %email, error = %e, "time tracking store error"),
            Err(e) => tracing::warn!(email = %email, error = %e, "tick task failed"),
        }
    }
}
