//! Advisory session lease shared between dashboard instances.

use alloc::string::String;

/// Default staleness threshold after which a lease is considered abandoned.
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 15_000;

/// Default heartbeat cadence. Must stay below the staleness threshold.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Ownership record for the single logical dashboard session.
///
/// Liveness is decided by heartbeat age, not by who wrote last: a lease
/// is live iff `now - last_heartbeat_ms < stale_threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionLease {
    /// Token identifying the instance that claimed the lease.
    pub owner_token: String,

    /// Unix timestamp in milliseconds when the lease was claimed.
    pub claimed_at_ms: u64,

    /// Unix timestamp in milliseconds of the most recent heartbeat.
    pub last_heartbeat_ms: u64,
}

impl SessionLease {
    /// Create a freshly claimed lease.
    pub fn new(owner_token: impl Into<String>, now_ms: u64) -> Self {
        Self {
            owner_token: owner_token.into(),
            claimed_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
        }
    }

    /// Milliseconds since the last heartbeat. Clock skew backwards counts as zero.
    pub fn heartbeat_age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_heartbeat_ms)
    }

    /// Whether the lease is still held by a running instance.
    pub fn is_live(&self, now_ms: u64, stale_threshold_ms: u64) -> bool {
        self.heartbeat_age_ms(now_ms) < stale_threshold_ms
    }

    /// Whether the given token owns this lease.
    pub fn is_owned_by(&self, token: &str) -> bool {
        self.owner_token == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lease_is_live() {
        let lease = SessionLease::new("a", 1_000);
        assert!(lease.is_live(1_000, DEFAULT_STALE_THRESHOLD_MS));
        assert!(lease.is_live(15_999, DEFAULT_STALE_THRESHOLD_MS));
    }

    #[test]
    fn lease_goes_stale_at_threshold() {
        let lease = SessionLease::new("a", 1_000);
        assert!(!lease.is_live(16_000, DEFAULT_STALE_THRESHOLD_MS));
    }

    #[test]
    fn clock_running_backwards_keeps_lease_live() {
        let lease = SessionLease::new("a", 10_000);
        assert_eq!(lease.heartbeat_age_ms(5_000), 0);
        assert!(lease.is_live(5_000, DEFAULT_STALE_THRESHOLD_MS));
    }

    #[test]
    fn default_cadence_is_below_threshold() {
        assert!(DEFAULT_HEARTBEAT_INTERVAL_MS < DEFAULT_STALE_THRESHOLD_MS);
    }
}
