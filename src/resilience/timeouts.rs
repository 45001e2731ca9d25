//! Deadlines for every external operation.

use std::time::Duration;

/// Default panel call timeout when none is configured.
pub const DEFAULT_PANEL_TIMEOUT: Duration = Duration::from_secs(5);
/// Time a mux client has to deliver its first request head.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Connect timeout when dialing a mux backend.
pub const BACKEND_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Panel timeout from configured seconds; 0 means the default.
pub fn panel_timeout(secs: u64) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs)
    } else {
        DEFAULT_PANEL_TIMEOUT
    }
}
