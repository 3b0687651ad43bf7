use chrono::NaiveDateTime;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[cfg(test)]
pub use fixed::FixedClock;

#[cfg(test)]
mod fixed {
    use super::Clock;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Mutex;

    /// Test clock that only moves when told to.
    pub struct FixedClock(Mutex<NaiveDateTime>);

    impl FixedClock {
        pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Self {
            let t = NaiveDate::from_ymd_opt(y, mo, d)
                .and_then(|date| date.and_hms_opt(h, mi, s))
                .expect("valid test timestamp");
            Self(Mutex::new(t))
        }

        pub fn set(&self, h: u32, mi: u32, s: u32) {
            let mut t = self.0.lock().unwrap();
            *t = t.date().and_hms_opt(h, mi, s).expect("valid test time");
        }

        pub fn next_day(&self) {
            let mut t = self.0.lock().unwrap();
            *t += chrono::Duration::days(1);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }
}
