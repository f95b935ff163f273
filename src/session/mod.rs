//! Cross-instance session arbitration.
//!
//! Only one dashboard instance should hold the broker session at a time
//! (the broker sees a single fixed client id). Instances coordinate
//! through a shared [`KvStore`] holding two keys: a session marker and a
//! heartbeat timestamp.
//!
//! This is advisory locking. Two instances racing inside the staleness
//! window can both be admitted; the goal is to avoid *persistent*
//! duplicate sessions, not instantaneous races.
//!
//! ```text
//!   instance A                 store                    instance B
//!   try_claim() ──────────▶ marker=A, hb=t0
//!   heartbeat() every 10s ─▶ hb=t
//!                                           ◀──────── try_claim(): false (hb fresh)
//!   (A dies)
//!                            hb older than 15s ◀───── try_claim(): true, marker=B
//! ```

mod store;

pub use store::{FileStore, KvStore, MemoryStore};

use std::sync::Arc;
use std::time::Duration;

use auralink_types::SessionLease;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::StoreError;

/// Store key of the session marker.
pub const SESSION_KEY: &str = "auralink_mqtt_session";

/// Store key of the heartbeat timestamp.
pub const HEARTBEAT_KEY: &str = "auralink_heartbeat";

/// Value stored under [`SESSION_KEY`].
#[derive(Debug, Serialize, Deserialize)]
struct SessionMarker {
    owner_token: String,
    claimed_at_ms: u64,
}

/// Advisory mutual exclusion between dashboard instances.
#[derive(Debug)]
pub struct SessionArbiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    token: String,
    stale_threshold_ms: u64,
}

impl SessionArbiter {
    /// Create an arbiter identified by `token`.
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        token: impl Into<String>,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            token: token.into(),
            stale_threshold_ms: stale_threshold.as_millis() as u64,
        }
    }

    /// Create an arbiter with a token unique to this process and moment.
    pub fn with_generated_token(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        stale_threshold: Duration,
    ) -> Self {
        let token = format!("{}-{}", std::process::id(), clock.now_ms());
        Self::new(store, clock, token, stale_threshold)
    }

    /// This instance's owner token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Read the lease currently in the store, live or not.
    ///
    /// Both keys must be present; a marker without a parsable heartbeat
    /// is not a lease.
    pub fn current_lease(&self) -> Result<Option<SessionLease>, StoreError> {
        let Some(marker) = self.store.get(SESSION_KEY)? else {
            return Ok(None);
        };
        let Some(heartbeat) = self.store.get(HEARTBEAT_KEY)? else {
            return Ok(None);
        };

        let Ok(last_heartbeat_ms) = heartbeat.trim().parse::<u64>() else {
            warn!("Ignoring session heartbeat that is not a timestamp: {:?}", heartbeat);
            return Ok(None);
        };

        // Markers written by other tools may be plain text; treat the text as the owner
        let (owner_token, claimed_at_ms) = match serde_json::from_str::<SessionMarker>(&marker) {
            Ok(m) => (m.owner_token, m.claimed_at_ms),
            Err(_) => (marker, last_heartbeat_ms),
        };

        Ok(Some(SessionLease {
            owner_token,
            claimed_at_ms,
            last_heartbeat_ms,
        }))
    }

    /// The lease in the store, only if it is live.
    pub fn live_lease(&self) -> Result<Option<SessionLease>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .current_lease()?
            .filter(|lease| lease.is_live(now, self.stale_threshold_ms)))
    }

    /// Whether this instance holds the lease in the store.
    pub fn holds_lease(&self) -> Result<bool, StoreError> {
        Ok(self
            .current_lease()?
            .is_some_and(|lease| lease.is_owned_by(&self.token)))
    }

    /// Try to take the session.
    ///
    /// Returns `false` if another instance's lease is live. Otherwise
    /// writes a fresh lease for this instance and returns `true`.
    pub fn try_claim(&self) -> Result<bool, StoreError> {
        if let Some(lease) = self.live_lease()? {
            if !lease.is_owned_by(&self.token) {
                info!(
                    owner = %lease.owner_token,
                    age_ms = lease.heartbeat_age_ms(self.clock.now_ms()),
                    "Another instance holds a live session"
                );
                return Ok(false);
            }
            debug!("Re-claiming our own live session");
        }

        let now = self.clock.now_ms();
        let marker = SessionMarker {
            owner_token: self.token.clone(),
            claimed_at_ms: now,
        };
        let marker = serde_json::to_string(&marker).map_err(|e| StoreError::Corrupt {
            key: SESSION_KEY.to_string(),
            reason: e.to_string(),
        })?;

        self.store.set(SESSION_KEY, &marker)?;
        self.store.set(HEARTBEAT_KEY, &now.to_string())?;
        info!(token = %self.token, "Claimed dashboard session");
        Ok(true)
    }

    /// Refresh the heartbeat of the lease this instance holds.
    ///
    /// Does nothing if the lease belongs to someone else or is gone.
    /// Returns whether the heartbeat was written.
    pub fn heartbeat(&self) -> Result<bool, StoreError> {
        if !self.holds_lease()? {
            debug!("Skipping heartbeat, session not held by this instance");
            return Ok(false);
        }
        self.store
            .set(HEARTBEAT_KEY, &self.clock.now_ms().to_string())?;
        Ok(true)
    }

    /// Remove the lease unconditionally.
    ///
    /// Best-effort and always safe to call, including when nothing is held.
    pub fn release(&self) {
        for key in [SESSION_KEY, HEARTBEAT_KEY] {
            if let Err(e) = self.store.delete(key) {
                warn!("Failed to remove session key {}: {}", key, e);
            }
        }
        debug!(token = %self.token, "Released dashboard session");
    }
}
