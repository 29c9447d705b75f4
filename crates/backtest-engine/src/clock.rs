use chrono::{DateTime, NaiveDate, Utc};
use sentiment_strategy::Clock;
use std::sync::Mutex;

/// Replay clock, moved forward by the runner one bar at a time
#[derive(Debug)]
pub struct SimClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Daily bars are evaluated at the 20:00 UTC close
    pub fn set_to_close(&self, date: NaiveDate) {
        let close = date.and_hms_opt(20, 0, 0).unwrap_or_default().and_utc();
        self.set(close);
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
