//! Warm-pool bookkeeping.
//!
//! The pool is a bounded list of `(container, in_use, last_used)` entries
//! shared by every session using the pooled placement strategy. This module
//! only mutates the list; the container I/O around acquisition and release
//! (start, workspace clean, create, remove) lives in the manager so the lock
//! is never held across a runtime call.
//!
//! Borrowing flips `in_use` inside the critical section, so two callers
//! racing on the same freed entry can never both walk away with it.

use crate::container::image::images_match;
use crate::container::manager::ManagedContainer;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Warm-pool bounds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of pooled containers
    pub max_size: usize,
    /// Pool is topped up to this size after a release
    pub min_size: usize,
    /// Idle entries older than this are evicted during maintenance
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_size: 2,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

struct PoolEntry {
    container: ManagedContainer,
    in_use: bool,
    last_used: Instant,
}

/// Bounded list of warm containers keyed by image.
pub(crate) struct ContainerPool {
    entries: Mutex<Vec<PoolEntry>>,
    config: PoolConfig,
}

impl ContainerPool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            config,
        }
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow a free entry matching the image, marking it in use atomically.
    pub(crate) fn borrow_matching(&self, image: &str) -> Option<ManagedContainer> {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        for entry in entries.iter_mut() {
            if !entry.in_use && images_match(&entry.container.image, image) {
                entry.in_use = true;
                debug!("Borrowed pooled container {}", entry.container.name);
                return Some(entry.container.clone());
            }
        }
        None
    }

    /// Whether a new entry may still be added under `max_size`.
    pub(crate) fn has_room(&self) -> bool {
        self.entries.lock().expect("pool lock poisoned").len() < self.config.max_size
    }

    /// Track a freshly created container, optionally already borrowed.
    ///
    /// Returns `false` without inserting when the pool is already at its
    /// maximum size; the caller then owns the container's teardown.
    pub(crate) fn insert_within_cap(&self, container: ManagedContainer, in_use: bool) -> bool {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        if entries.len() >= self.config.max_size {
            return false;
        }
        entries.push(PoolEntry {
            container,
            in_use,
            last_used: Instant::now(),
        });
        true
    }

    /// Return a borrowed entry to the free list and stamp `last_used`.
    pub(crate) fn mark_free(&self, container_id: &str) {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.container.id == container_id) {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    /// Drop an entry from the pool entirely (cleanup failed, or removal).
    pub(crate) fn discard(&self, container_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        let before = entries.len();
        entries.retain(|e| e.container.id != container_id);
        entries.len() != before
    }

    /// Take every free entry idle for longer than the configured timeout.
    ///
    /// The entries are removed from the pool inside the critical section;
    /// the caller owns their teardown.
    pub(crate) fn take_idle_expired(&self) -> Vec<ManagedContainer> {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        let now = Instant::now();
        let mut expired = Vec::new();
        entries.retain(|e| {
            if !e.in_use && now.duration_since(e.last_used) > self.config.idle_timeout {
                expired.push(e.container.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Take every entry, emptying the pool. Used by global cleanup.
    pub(crate) fn drain_all(&self) -> Vec<ManagedContainer> {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        entries.drain(..).map(|e| e.container).collect()
    }

    /// `(total, free)` entry counts.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let entries = self.entries.lock().expect("pool lock poisoned");
        let free = entries.iter().filter(|e| !e.in_use).count();
        (entries.len(), free)
    }

}
