//! Time-bound validity wrapper around a registration

use serde::{Deserialize, Serialize};

use crate::clock::now_millis;

/// Default lease validity window
pub const DEFAULT_LEASE_DURATION_MS: u64 = 90_000;

/// A lease tracks whether a registration is still being actively renewed.
///
/// The eviction timestamp is set at most once; cancellation is idempotent and
/// a cancelled lease never becomes valid again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    registration_timestamp: u64,
    last_renewal_timestamp: u64,
    eviction_timestamp: u64,
    duration_ms: u64,
}

impl Lease {
    #[must_use]
    pub fn new(duration_ms: u64) -> Self {
        let now = now_millis();
        Self {
            registration_timestamp: now,
            last_renewal_timestamp: now,
            eviction_timestamp: 0,
            duration_ms,
        }
    }

    /// Record a heartbeat or update as a renewal
    pub fn renew(&mut self) {
        self.last_renewal_timestamp = now_millis();
    }

    /// Cancel the lease. The first call wins; later calls are no-ops.
    pub fn cancel(&mut self) {
        if self.eviction_timestamp == 0 {
            self.eviction_timestamp = now_millis();
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Expiry check against an explicit clock reading
    #[must_use]
    pub const fn is_expired_at(&self, now: u64) -> bool {
        self.eviction_timestamp > 0 || now > self.last_renewal_timestamp + self.duration_ms
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.eviction_timestamp > 0
    }

    #[must_use]
    pub const fn registration_timestamp(&self) -> u64 {
        self.registration_timestamp
    }

    #[must_use]
    pub const fn last_renewal_timestamp(&self) -> u64 {
        self.last_renewal_timestamp
    }

    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}
