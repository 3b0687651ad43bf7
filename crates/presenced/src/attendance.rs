//! Per-employee, per-day check-in / check-out transitions.

use crate::clock::Clock;
use crate::snapshot::SnapshotEvent;
use crate::store::{AttendanceRecord, AttendanceStore, StoreError, TimeTrackingRecord};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::sync::Arc;

const HMS: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    NotCheckedIn,
    CheckedIn,
    CheckedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    CheckedIn { at: NaiveTime },
    AlreadyCheckedIn { at: NaiveTime },
    AlreadyCheckedOut { at: Option<NaiveTime> },
}

impl CheckInOutcome {
    /// A repeat check-in on the same day is still a success.
    pub fn is_success(&self) -> bool {
        !matches!(self, CheckInOutcome::AlreadyCheckedOut { .. })
    }

    /// Only the first check-in of the day is photographed.
    pub fn snapshot(&self) -> Option<SnapshotEvent> {
        matches!(self, CheckInOutcome::CheckedIn { .. }).then_some(SnapshotEvent::CheckIn)
    }

    pub fn status(&self) -> String {
        match self {
            CheckInOutcome::CheckedIn { at } => format!(
                "You Successfully Checked In at {}. Welcome to the Company . Have a Great Day at Work ",
                at.format(HMS)
            ),
            CheckInOutcome::AlreadyCheckedIn { at } => format!(
                "You Already Checked in at {} ! You can now Check Out Only :)",
                at.format(HMS)
            ),
            CheckInOutcome::AlreadyCheckedOut { at } => format!(
                "You Already Checked Out at {} ! See You Tomorrow :)",
                hms_or_unknown(*at)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutOutcome {
    CheckedOut { at: NaiveTime },
    NotCheckedIn,
    AlreadyCheckedOut { at: Option<NaiveTime> },
}

impl CheckOutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutOutcome::CheckedOut { .. })
    }

    pub fn snapshot(&self) -> Option<SnapshotEvent> {
        self.is_success().then_some(SnapshotEvent::CheckOut)
    }

    pub fn status(&self) -> String {
        match self {
            CheckOutOutcome::CheckedOut { at } => {
                format!("Successfully Checked Out at {}", at.format(HMS))
            }
            CheckOutOutcome::NotCheckedIn => "You Have not Checked In Yet".to_string(),
            CheckOutOutcome::AlreadyCheckedOut { at } => {
                format!("You Already Checked Out at {}", hms_or_unknown(*at))
            }
        }
    }
}

fn hms_or_unknown(at: Option<NaiveTime>) -> String {
    at.map(|t| t.format(HMS).to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn state_of(record: Option<&AttendanceRecord>) -> AttendanceState {
    match record {
        None => AttendanceState::NotCheckedIn,
        Some(r) if r.checked_out => AttendanceState::CheckedOut,
        Some(_) => AttendanceState::CheckedIn,
    }
}

/// Drives the NotCheckedIn -> CheckedIn -> CheckedOut machine for today's date.
///
/// Identity verification happens before these calls; this layer only sees
/// persisted state and the clock.
pub struct Attendance {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl Attendance {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    fn now(&self) -> NaiveDateTime {
        let now = self.clock.now();
        now.with_nanosecond(0).unwrap_or(now)
    }

    pub fn state(&self, email: &str, date: NaiveDate) -> Result<AttendanceState, StoreError> {
        Ok(state_of(self.store.find_attendance(email, date)?.as_ref()))
    }

    pub fn check_in(&self, name: &str, email: &str) -> Result<CheckInOutcome, StoreError> {
        let now = self.now();
        let date = now.date();

        if let Some(existing) = self.store.find_attendance(email, date)? {
            return Ok(existing_check_in(&existing));
        }

        let attendance = AttendanceRecord {
            name: name.to_string(),
            email: email.to_string(),
            date,
            check_in_time: now.time(),
            checked_out: false,
            check_out_time: None,
        };
        let time = TimeTrackingRecord {
            name: name.to_string(),
            email: email.to_string(),
            date,
            total_secs: 0,
            idle_secs: 0,
        };

        if !self.store.insert_check_in(&attendance, &time)? {
            // Someone else inserted between our read and write.
            let existing = self.store.find_attendance(email, date)?.ok_or_else(|| {
                StoreError::Corrupt(format!("attendance for {email} on {date} vanished"))
            })?;
            return Ok(existing_check_in(&existing));
        }

        tracing::info!(name, email, %date, at = %now.time(), "checked in");
        Ok(CheckInOutcome::CheckedIn { at: now.time() })
    }

    pub fn check_out(&self, email: &str) -> Result<CheckOutOutcome, StoreError> {
        let now = self.now();
        let date = now.date();

        let Some(existing) = self.store.find_attendance(email, date)? else {
            return Ok(CheckOutOutcome::NotCheckedIn);
        };
        if existing.checked_out {
            return Ok(CheckOutOutcome::AlreadyCheckedOut {
                at: existing.check_out_time,
            });
        }

        if !self.store.set_check_out(email, date, now.time())? {
            let at = self
                .store
                .find_attendance(email, date)?
                .and_then(|r| r.check_out_time);
            return Ok(CheckOutOutcome::AlreadyCheckedOut { at });
        }

        tracing::info!(email, %date, at = %now.time(), "checked out");
        Ok(CheckOutOutcome::CheckedOut { at: now.time() })
    }
}

fn existing_check_in(record: &AttendanceRecord) -> CheckInOutcome {
    if record.checked_out {
        CheckInOutcome::AlreadyCheckedOut {
            at: record.check_out_time,
        }
    } else {
        CheckInOutcome::AlreadyCheckedIn {
            at: record.check_in_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::SqliteStore;

    const EMAIL: &str = "alice@corp.com";

    fn setup() -> (Attendance, Arc<FixedClock>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::at(2024, 3, 14, 9, 0, 0));
        let attendance = Attendance::new(store.clone(), clock.clone());
        (attendance, clock, store)
    }

    #[test]
    fn test_first_check_in_succeeds() {
        let (attendance, _, store) = setup();
        let outcome = attendance.check_in("Alice", EMAIL).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.snapshot(), Some(SnapshotEvent::CheckIn));
        assert!(outcome.status().contains("Successfully Checked In at 09:00:00"));

        let day = attendance.today();
        assert_eq!(attendance.state(EMAIL, day).unwrap(), AttendanceState::CheckedIn);
        let time = store.find_time(EMAIL, day).unwrap().unwrap();
        assert_eq!((time.total_secs, time.idle_secs), (0, 0));
    }

    #[test]
    fn test_repeat_check_in_keeps_original_time() {
        let (attendance, clock, _) = setup();
        attendance.check_in("Alice", EMAIL).unwrap();

        clock.set(9, 5, 0);
        let outcome = attendance.check_in("Alice", EMAIL).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.snapshot(), None);
        assert_eq!(
            outcome.status(),
            "You Already Checked in at 09:00:00 ! You can now Check Out Only :)"
        );
    }

    #[test]
    fn test_check_out_before_check_in() {
        let (attendance, _, _) = setup();
        let outcome = attendance.check_out(EMAIL).unwrap();
        assert_eq!(outcome, CheckOutOutcome::NotCheckedIn);
        assert_eq!(outcome.status(), "You Have not Checked In Yet");
        assert_eq!(
            attendance.state(EMAIL, attendance.today()).unwrap(),
            AttendanceState::NotCheckedIn
        );
    }

    #[test]
    fn test_check_out_once_then_reports_first_time() {
        let (attendance, clock, _) = setup();
        attendance.check_in("Alice", EMAIL).unwrap();

        clock.set(17, 30, 0);
        let first = attendance.check_out(EMAIL).unwrap();
        assert!(first.is_success());
        assert_eq!(first.status(), "Successfully Checked Out at 17:30:00");
        assert_eq!(first.snapshot(), Some(SnapshotEvent::CheckOut));

        clock.set(18, 0, 0);
        let second = attendance.check_out(EMAIL).unwrap();
        assert_eq!(second.status(), "You Already Checked Out at 17:30:00");
        assert_eq!(second.snapshot(), None);
    }

    #[test]
    fn test_check_in_after_check_out_is_refused() {
        let (attendance, clock, _) = setup();
        attendance.check_in("Alice", EMAIL).unwrap();
        clock.set(17, 0, 0);
        attendance.check_out(EMAIL).unwrap();

        clock.set(17, 10, 0);
        let outcome = attendance.check_in("Alice", EMAIL).unwrap();
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.status(),
            "You Already Checked Out at 17:00:00 ! See You Tomorrow :)"
        );
        assert_eq!(
            attendance.state(EMAIL, attendance.today()).unwrap(),
            AttendanceState::CheckedOut
        );
    }

    #[test]
    fn test_new_day_starts_fresh() {
        let (attendance, clock, _) = setup();
        attendance.check_in("Alice", EMAIL).unwrap();
        clock.set(17, 0, 0);
        attendance.check_out(EMAIL).unwrap();

        clock.next_day();
        clock.set(8, 45, 0);
        let outcome = attendance.check_in("Alice", EMAIL).unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn test_employees_are_independent() {
        let (attendance, _, _) = setup();
        attendance.check_in("Alice", EMAIL).unwrap();
        assert!(attendance.check_in("Bob", "bob@corp.com").unwrap().is_success());
    }
}
