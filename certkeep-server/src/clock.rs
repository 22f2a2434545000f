//! Unix-second timestamps as persisted by the state store

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time truncated to whole seconds, so values survive a store round trip unchanged
pub fn now() -> SystemTime {
    from_unix_secs(unix_secs(SystemTime::now()))
}

pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
