//! Wall-clock timestamps shared by producer and consumer.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
///
/// Both sides of the camera channel run on the same machine, so the system
/// clock is a common time base for exposure timestamps.
pub fn now_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
