//! Attendance and time-tracking persistence.
//!
//! The daemon only talks to persistence through [`AttendanceStore`]; the
//! SQLite implementation keys both tables by (email, date).

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("persistence unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// One employee's attendance for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    pub email: String,
    pub date: NaiveDate,
    pub check_in_time: NaiveTime,
    pub checked_out: bool,
    pub check_out_time: Option<NaiveTime>,
}

/// Accumulated presence for one employee and day, in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTrackingRecord {
    pub name: String,
    pub email: String,
    pub date: NaiveDate,
    pub total_secs: u64,
    pub idle_secs: u64,
}

/// Narrow record interface over the attendance database.
pub trait AttendanceStore: Send + Sync {
    fn find_attendance(
        &self,
        email: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Insert the day's attendance and zeroed time-tracking records together,
    /// unless attendance already exists. Returns whether anything was inserted.
    fn insert_check_in(
        &self,
        attendance: &AttendanceRecord,
        time: &TimeTrackingRecord,
    ) -> Result<bool, StoreError>;

    /// Mark the day as checked out, only if it is not already.
    /// Returns whether the record changed.
    fn set_check_out(
        &self,
        email: &str,
        date: NaiveDate,
        at: NaiveTime,
    ) -> Result<bool, StoreError>;

    fn find_time(
        &self,
        email: &str,
        date: NaiveDate,
    ) -> Result<Option<TimeTrackingRecord>, StoreError>;

    /// Overwrite the day's totals. Returns false if there is no record to update.
    fn update_time(
        &self,
        email: &str,
        date: NaiveDate,
        total_secs: u64,
        idle_secs: u64,
    ) -> Result<bool, StoreError>;
}

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attendance (
                email          TEXT NOT NULL,
                name           TEXT NOT NULL,
                date           TEXT NOT NULL,
                check_in_time  TEXT NOT NULL,
                checked_out    INTEGER NOT NULL DEFAULT 0,
                check_out_time TEXT,
                PRIMARY KEY (email, date)
            );
            CREATE TABLE IF NOT EXISTS time_tracking (
                email      TEXT NOT NULL,
                name       TEXT NOT NULL,
                date       TEXT NOT NULL,
                total_secs INTEGER NOT NULL DEFAULT 0,
                idle_secs  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (email, date)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn fmt_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn parse_time(text: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(text, TIME_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("time {text:?}: {e}")))
}

fn parse_date(text: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("date {text:?}: {e}")))
}

impl AttendanceStore for SqliteStore {
    fn find_attendance(
        &self,
        email: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT name, email, date, check_in_time, checked_out, check_out_time
                 FROM attendance WHERE email = ?1 AND date = ?2",
                params![email, fmt_date(date)],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, bool>(4)?,
                        r.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, email, date, check_in, checked_out, check_out)) = row else {
            return Ok(None);
        };

        Ok(Some(AttendanceRecord {
            name,
            email,
            date: parse_date(&date)?,
            check_in_time: parse_time(&check_in)?,
            checked_out,
            check_out_time: check_out.as_deref().map(parse_time).transpose()?,
        }))
    }

    fn insert_check_in(
        &self,
        attendance: &AttendanceRecord,
        time: &TimeTrackingRecord,
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO attendance (email, name, date, check_in_time, checked_out, check_out_time)
             VALUES (?1, ?2, ?3, ?4, 0, NULL)",
            params![
                attendance.email,
                attendance.name,
                fmt_date(attendance.date),
                fmt_time(attendance.check_in_time)
            ],
        )? == 1;

        if inserted {
            tx.execute(
                "INSERT OR IGNORE INTO time_tracking (email, name, date, total_secs, idle_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    time.email,
                    time.name,
                    fmt_date(time.date),
                    time.total_secs as i64,
                    time.idle_secs as i64
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn set_check_out(
        &self,
        email: &str,
        date: NaiveDate,
        at: NaiveTime,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE attendance SET checked_out = 1, check_out_time = ?3
             WHERE email = ?1 AND date = ?2 AND checked_out = 0",
            params![email, fmt_date(date), fmt_time(at)],
        )?;
        Ok(changed == 1)
    }

    fn find_time(
        &self,
        email: &str,
        date: NaiveDate,
    ) -> Result<Option<TimeTrackingRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT name, email, date, total_secs, idle_secs
                 FROM time_tracking WHERE email = ?1 AND date = ?2",
                params![email, fmt_date(date)],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(name, email, date, total, idle)| {
            Ok(TimeTrackingRecord {
                name,
                email,
                date: parse_date(&date)?,
                total_secs: total.max(0) as u64,
                idle_secs: idle.max(0) as u64,
            })
        })
        .transpose()
    }

    fn update_time(
        &self,
        email: &str,
        date: NaiveDate,
        total_secs: u64,
        idle_secs: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE time_tracking SET total_secs = ?3, idle_secs = ?4
             WHERE email = ?1 AND date = ?2",
            params![email, fmt_date(date), total_secs as i64, idle_secs as i64],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn records(email: &str) -> (AttendanceRecord, TimeTrackingRecord) {
        (
            AttendanceRecord {
                name: "Alice".into(),
                email: email.into(),
                date: day(),
                check_in_time: at(9, 0),
                checked_out: false,
                check_out_time: None,
            },
            TimeTrackingRecord {
                name: "Alice".into(),
                email: email.into(),
                date: day(),
                total_secs: 0,
                idle_secs: 0,
            },
        )
    }

    #[test]
    fn test_insert_is_once_per_day() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, t) = records("alice@corp.com");
        assert!(store.insert_check_in(&a, &t).unwrap());
        assert!(!store.insert_check_in(&a, &t).unwrap());

        let found = store.find_attendance("alice@corp.com", day()).unwrap().unwrap();
        assert_eq!(found, a);
        assert_eq!(store.find_time("alice@corp.com", day()).unwrap().unwrap(), t);
    }

    #[test]
    fn test_other_day_is_separate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, t) = records("alice@corp.com");
        store.insert_check_in(&a, &t).unwrap();
        let tomorrow = day().succ_opt().unwrap();
        assert!(store.find_attendance("alice@corp.com", tomorrow).unwrap().is_none());
        assert!(store.find_time("alice@corp.com", tomorrow).unwrap().is_none());
    }

    #[test]
    fn test_check_out_only_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, t) = records("alice@corp.com");
        store.insert_check_in(&a, &t).unwrap();

        assert!(store.set_check_out("alice@corp.com", day(), at(17, 0)).unwrap());
        assert!(!store.set_check_out("alice@corp.com", day(), at(18, 0)).unwrap());

        let found = store.find_attendance("alice@corp.com", day()).unwrap().unwrap();
        assert!(found.checked_out);
        assert_eq!(found.check_out_time, Some(at(17, 0)));
    }

    #[test]
    fn test_check_out_without_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.set_check_out("nobody@corp.com", day(), at(17, 0)).unwrap());
    }

    #[test]
    fn test_update_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.update_time("alice@corp.com", day(), 5, 1).unwrap());

        let (a, t) = records("alice@corp.com");
        store.insert_check_in(&a, &t).unwrap();
        assert!(store.update_time("alice@corp.com", day(), 120, 30).unwrap());

        let found = store.find_time("alice@corp.com", day()).unwrap().unwrap();
        assert_eq!((found.total_secs, found.idle_secs), (120, 30));
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        let store = SqliteStore::open(&path).unwrap();
        let (a, t) = records("alice@corp.com");
        store.insert_check_in(&a, &t).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.find_attendance("alice@corp.com", day()).unwrap().is_some());
    }
}
