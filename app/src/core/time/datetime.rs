use std::{
    fmt::Display,
    ops::{Add, Sub},
};

use tokio::task_local;

use super::Duration;

task_local! {
    pub static FIXED_NOW: DateTime;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    delegate: chrono::DateTime<chrono::Local>,
}

impl DateTime {
    fn new<T: chrono::TimeZone>(delegate: chrono::DateTime<T>) -> Self {
        Self {
            delegate: delegate.with_timezone(&chrono::Local),
        }
    }

    pub fn now() -> Self {
        FIXED_NOW
            .try_with(|t| *t)
            .unwrap_or_else(|_| chrono::Local::now().into())
    }

    pub async fn eval_timeshifted<F, T>(&self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        FIXED_NOW.scope(*self, f).await
    }

    pub fn from_iso(iso8601: &str) -> anyhow::Result<Self> {
        Ok(chrono::DateTime::parse_from_rfc3339(iso8601)?.into())
    }

    pub fn to_iso_string(&self) -> String {
        self.delegate.to_rfc3339()
    }

    /// Seconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.delegate.timestamp()
    }

    pub fn weekday(&self) -> chrono::Weekday {
        use chrono::Datelike;
        self.delegate.weekday()
    }

    pub fn hour(&self) -> u32 {
        use chrono::Timelike;
        self.delegate.hour()
    }

    pub fn minute(&self) -> u32 {
        use chrono::Timelike;
        self.delegate.minute()
    }

    pub fn elapsed_since(&self, since: Self) -> Duration {
        Duration::new(self.delegate - since.delegate)
    }

    pub fn elapsed(&self) -> Duration {
        Self::now().elapsed_since(*self)
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.delegate)
    }
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::new(self.delegate + rhs.delegate())
    }
}

impl Sub<Duration> for DateTime {
    type Output = DateTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self::new(self.delegate - rhs.delegate())
    }
}

impl<T: chrono::TimeZone> From<chrono::DateTime<T>> for DateTime {
    fn from(val: chrono::DateTime<T>) -> Self {
        DateTime::new(val)
    }
}
