use super::DateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    delegate: chrono::Duration,
}

impl Duration {
    pub(super) fn new(delegate: chrono::Duration) -> Self {
        Self { delegate }
    }

    pub(super) fn delegate(&self) -> chrono::Duration {
        self.delegate
    }

    pub fn until(date_time: &DateTime) -> Self {
        date_time.elapsed_since(DateTime::now())
    }

    pub fn minutes(minutes: i64) -> Self {
        Self::new(chrono::Duration::minutes(minutes))
    }

    pub fn seconds(seconds: i64) -> Self {
        Self::new(chrono::Duration::seconds(seconds))
    }

    pub fn as_secs(&self) -> i64 {
        self.delegate.num_seconds()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.delegate.num_milliseconds() as f64 / 1000.0
    }
}

impl From<Duration> for std::time::Duration {
    fn from(val: Duration) -> Self {
        let millis = val.delegate.num_milliseconds().max(0);
        std::time::Duration::from_millis(millis as u64)
    }
}

impl std::ops::Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Self {
            delegate: self.delegate + rhs.delegate,
        }
    }
}
