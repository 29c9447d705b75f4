use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days of news looked back from "now"
pub const TRAILING_DAYS: i64 = 3;

/// Inclusive calendar-date range of news to score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl NewsWindow {
    /// Window of `days` calendar days ending on the date of `now`.
    pub fn trailing(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: (now - Duration::days(days)).date_naive(),
            end: now.date_naive(),
        }
    }

    /// The standard three-day window
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        Self::trailing(now, TRAILING_DAYS)
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for NewsWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_str(), self.end_str())
    }
}
