//! Presence registry.
//!
//! Tracks which authenticated identities are online. An identity is online
//! while it has at least one open viewer connection, or while its last
//! activity is younger than the timeout. The timeout covers clients that
//! vanish without a clean disconnect.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! await point.

use crate::observability::metrics;
use common::types::UserIdentity;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct PresenceEntry {
    /// `None` once the grace period was ended by logout.
    last_seen: Option<Instant>,
    active_connections: u32,
}

impl PresenceEntry {
    fn is_online(&self, now: Instant, timeout: Duration) -> bool {
        self.active_connections > 0
            || self
                .last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) < timeout)
    }
}

/// Registry of online identities.
#[derive(Debug)]
pub struct PresenceRegistry {
    timeout: Duration,
    entries: Mutex<HashMap<UserIdentity, PresenceEntry>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A viewer connection opened.
    pub fn on_connect(&self, identity: &UserIdentity) {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = entries.entry(identity.clone()).or_insert(PresenceEntry {
            last_seen: Some(now),
            active_connections: 0,
        });
        entry.active_connections = entry.active_connections.saturating_add(1);
        entry.last_seen = Some(now);

        debug!(
            target: "relay.presence",
            user = %identity,
            connections = entry.active_connections,
            "Viewer connected"
        );
        publish(&entries, now, self.timeout);
    }

    /// A viewer connection closed.
    ///
    /// A disconnect without a matching connect is tolerated. `last_seen` is
    /// refreshed so the identity stays online until the timeout elapses.
    pub fn on_disconnect(&self, identity: &UserIdentity) {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = entries.entry(identity.clone()).or_insert(PresenceEntry {
            last_seen: Some(now),
            active_connections: 0,
        });
        entry.active_connections = entry.active_connections.saturating_sub(1);
        entry.last_seen = Some(now);

        debug!(
            target: "relay.presence",
            user = %identity,
            connections = entry.active_connections,
            "Viewer disconnected"
        );
        publish(&entries, now, self.timeout);
    }

    /// Any authenticated activity from `identity`.
    pub fn on_heartbeat(&self, identity: &UserIdentity) {
        let now = Instant::now();
        let mut entries = self.lock();
        let created = !entries.contains_key(identity);
        entries
            .entry(identity.clone())
            .and_modify(|e| e.last_seen = Some(now))
            .or_insert(PresenceEntry {
                last_seen: Some(now),
                active_connections: 0,
            });
        if created {
            publish(&entries, now, self.timeout);
        }
    }

    /// End the identity's idle grace period immediately.
    ///
    /// Open viewer connections still count. The entry is removed only when
    /// none remain. Returns whether the identity was tracked.
    pub fn forget(&self, identity: &UserIdentity) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(identity) else {
            return false;
        };

        if entry.active_connections == 0 {
            entries.remove(identity);
        } else {
            entry.last_seen = None;
        }

        debug!(target: "relay.presence", user = %identity, "Presence forgotten");
        publish(&entries, now, self.timeout);
        true
    }

    /// Identities currently online, sorted.
    pub fn list_online(&self) -> Vec<UserIdentity> {
        let now = Instant::now();
        let mut entries = self.lock();
        sweep_locked(&mut entries, now, self.timeout);

        let mut online: Vec<UserIdentity> = entries.keys().cloned().collect();
        online.sort();
        online
    }

    pub fn is_online(&self, identity: &UserIdentity) -> bool {
        let now = Instant::now();
        self.lock()
            .get(identity)
            .is_some_and(|e| e.is_online(now, self.timeout))
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        sweep_locked(&mut entries, now, self.timeout)
    }

    /// Number of tracked entries, including ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserIdentity, PresenceEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sweep_locked(
    entries: &mut HashMap<UserIdentity, PresenceEntry>,
    now: Instant,
    timeout: Duration,
) -> usize {
    let before = entries.len();
    entries.retain(|_, e| e.is_online(now, timeout));
    let removed = before - entries.len();
    if removed > 0 {
        debug!(target: "relay.presence", removed, "Expired presence entries swept");
    }
    publish(entries, now, timeout);
    removed
}

fn publish(entries: &HashMap<UserIdentity, PresenceEntry>, now: Instant, timeout: Duration) {
    let online = entries.values().filter(|e| e.is_online(now, timeout)).count();
    metrics::set_online_users(online);
}
