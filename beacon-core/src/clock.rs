//! Millisecond wall-clock helpers shared by leases and eviction timing

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
