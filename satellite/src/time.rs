//! Wall-clock helpers. Persisted timestamps are unix seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// True when `since` lies more than `window` before now.
pub fn older_than(since: u64, window: Duration) -> bool {
    unix_now().saturating_sub(since) > window.as_secs()
}
