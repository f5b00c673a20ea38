use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Mutex;

/// Source of server timestamps.
///
/// Readings are truncated to microseconds (the persisted precision) and
/// strictly increasing, so a write always moves `updatedAt` forward.
#[derive(Debug)]
pub struct ServerClock {
    last: Mutex<DateTime<Utc>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}
