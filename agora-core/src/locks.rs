//! Per-conversation lock registry
//!
//! Maps a conversation key to an exclusive-access primitive and records
//! acquisition timestamps independently of the primitive's own state. The
//! watchdog reasons purely over those timestamps, so it never needs to
//! inspect lock internals and never contends with holders during its scan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::key::ConversationKey;

struct LockEntry {
    /// Swappable cell holding the current exclusion primitive. Forced
    /// recovery replaces it, which makes the key acquirable again
    /// regardless of what the old holder does.
    semaphore: Arc<Semaphore>,
    /// Permit held by the current owner. `Some` iff the lock is held.
    permit: Option<OwnedSemaphorePermit>,
    /// Set the instant acquisition succeeds, cleared on release. Present
    /// iff the lock is held; the watchdog relies on this invariant.
    acquired_at: Option<Instant>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            permit: None,
            acquired_at: None,
        }
    }
}

/// Registry of per-conversation mutual-exclusion locks.
///
/// The registry-wide mutex guards only map lookups and bookkeeping. It is
/// never held while waiting on a conversation's lock, so operations on
/// different keys proceed fully in parallel.
pub struct LockRegistry {
    entries: Mutex<HashMap<ConversationKey, LockEntry>>,
}

impl LockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to a conversation's lock, creating the entry on first use.
    ///
    /// Idempotent: the returned handle refers to the same underlying
    /// primitive for the same key until a forced recovery replaces it.
    pub fn get_or_create(&self, key: &ConversationKey) -> Arc<Semaphore> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(%key, "created conversation lock");
                LockEntry::new()
            })
            .semaphore
            .clone()
    }

    /// Attempt to acquire a conversation's lock.
    ///
    /// With `wait` absent or zero this is a non-blocking attempt; otherwise
    /// the call blocks up to `wait`. Returns `false` on failure with no side
    /// effects. Contention is not an error: the caller decides whether to
    /// retry, queue, or reject the turn.
    pub async fn try_acquire(&self, key: &ConversationKey, wait: Option<Duration>) -> bool {
        let semaphore = self.get_or_create(key);

        let permit = match wait {
            Some(wait) if !wait.is_zero() => {
                match timeout(wait, Arc::clone(&semaphore).acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) | Err(_) => None,
                }
            }
            _ => Arc::clone(&semaphore).try_acquire_owned().ok(),
        };
        let Some(permit) = permit else {
            return false;
        };

        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if !Arc::ptr_eq(&entry.semaphore, &semaphore) {
            // the cell was swapped by a forced recovery while we were
            // waiting; the permit belongs to the retired primitive
            warn!(%key, "lock replaced during acquisition, discarding stale permit");
            return false;
        }
        entry.permit = Some(permit);
        entry.acquired_at = Some(Instant::now());
        debug!(%key, "acquired conversation lock");
        true
    }

    /// Release a conversation's lock.
    ///
    /// Releasing a lock that is not held is a programming error on the
    /// caller's side; it is logged and otherwise ignored, because a fatal
    /// fault here would take down unrelated conversations.
    pub fn release(&self, key: &ConversationKey) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(entry) if entry.permit.is_some() => {
                entry.permit = None;
                entry.acquired_at = None;
                debug!(%key, "released conversation lock");
            }
            _ => warn!(%key, "release of a lock that is not held"),
        }
    }

    /// Opportunistic busy probe.
    ///
    /// Attempts an acquisition and immediately backs out on success. The
    /// answer is a point-in-time observation, not a guarantee.
    pub fn is_busy(&self, key: &ConversationKey) -> bool {
        let semaphore = self.get_or_create(key);
        semaphore.try_acquire().is_err()
    }

    /// Keys whose locks have been held longer than `max_duration`.
    ///
    /// Read-only; does not mutate any entry.
    pub fn list_stuck(&self, max_duration: Duration) -> Vec<ConversationKey> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter_map(|(key, entry)| match entry.acquired_at {
                Some(acquired_at) if now.duration_since(acquired_at) > max_duration => {
                    Some(key.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Best-effort forced recovery of a stuck lock.
    ///
    /// The normal path drops the held permit. If bookkeeping says the lock
    /// is held but no permit is stored, the cell is replaced with a fresh
    /// unlocked primitive instead; the original holder's eventual release
    /// of the retired primitive is a harmless no-op. Returns true when the
    /// key is acquirable again.
    pub fn force_release(&self, key: &ConversationKey) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            warn!(%key, "force release for unknown lock");
            return false;
        };

        if entry.permit.is_some() {
            entry.permit = None;
            entry.acquired_at = None;
            info!(%key, "force-released conversation lock");
            return true;
        }
        if entry.acquired_at.is_some() {
            entry.semaphore = Arc::new(Semaphore::new(1));
            entry.acquired_at = None;
            info!(%key, "replaced wedged conversation lock");
            return true;
        }
        // not held; nothing to recover
        true
    }

    /// Number of known lock entries
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
