//! In-memory attempt store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::backend::AttemptStore;
use super::clock::{Clock, SystemClock};
use super::record::AttemptRecord;
use super::sweeper::Sweeper;
use crate::config::GuardConfig;

/// The store of attempt records, keyed by fingerprint.
///
/// Each key maps to an immutable [`AttemptRecord`] which is swapped whole on
/// every accepted attempt. Check-then-record runs under the key's slot lock
/// (see [`MemoryStore::try_acquire`]), so the ceiling holds when the store is
/// shared across threads.
///
/// While the store holds records a background sweeper evicts expired ones.
/// The sweeper starts on the first `record` into an empty store and stops
/// itself once the store drains. It needs an ambient tokio runtime; without
/// one, call [`MemoryStore::sweep`] directly.
pub struct MemoryStore {
    /// Attempt records indexed by fingerprint
    records: DashMap<String, Arc<AttemptRecord>>,
    /// Accepted attempts allowed per window
    max_attempts: u32,
    /// Period of the background sweep
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
    /// The running sweeper, if any
    sweeper: Mutex<Option<Sweeper>>,
    next_sweeper_id: AtomicU64,
    runtime_warned: AtomicBool,
    /// Set once a runtime without a time driver has been seen
    timers_unavailable: AtomicBool,
    this: Weak<MemoryStore>,
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new(max_attempts: u32, sweep_interval: Duration) -> Arc<Self> {
        Self::with_clock(max_attempts, sweep_interval, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(max_attempts: u32, sweep_interval: Duration, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            records: DashMap::new(),
            max_attempts,
            sweep_interval,
            clock,
            sweeper: Mutex::new(None),
            next_sweeper_id: AtomicU64::new(0),
            runtime_warned: AtomicBool::new(false),
            timers_unavailable: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Create a store for a guard configuration.
    pub fn from_config(config: &GuardConfig) -> Arc<Self> {
        Self::new(config.max_attempts, config.sweep_interval())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Whether `key` may be accepted.
    ///
    /// True when there is no live record for `key` or it has attempts left.
    /// An expired record that the sweeper has not reached yet counts as absent.
    pub fn can_access(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let allowed = match self.records.get(key) {
            Some(record) if !record.is_expired(now) => record.attempts() < self.max_attempts,
            _ => true,
        };

        trace!(key = %key, allowed = allowed, "Checked attempt record");
        allowed
    }

    /// Count one accepted attempt for `key`.
    ///
    /// Inserts a record with one attempt, or replaces the live record with an
    /// incremented copy whose window starts now. Starts the sweeper if it is
    /// not running.
    pub fn record(&self, key: &str, ttl: Duration) {
        let now = self.clock.now_millis();
        self.upsert(key, ttl, now);
        self.ensure_sweeper();
    }

    /// Check and record under the key's slot lock.
    ///
    /// Returns `false` and leaves the record untouched when `key` is at its
    /// ceiling, so a rejected request never extends the window.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let now = self.clock.now_millis();

        let acquired = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.is_expired(now) {
                    slot.insert(Arc::new(AttemptRecord::new(key, ttl, now)));
                    true
                } else if current.attempts() >= self.max_attempts {
                    false
                } else {
                    let next = current.increment(now);
                    slot.insert(Arc::new(next));
                    true
                }
            }
            Entry::Vacant(slot) => {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Creating attempt record");
                slot.insert(Arc::new(AttemptRecord::new(key, ttl, now)));
                true
            }
        };

        if acquired {
            self.ensure_sweeper();
        }
        acquired
    }

    fn upsert(&self, key: &str, ttl: Duration, now: u64) {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = if slot.get().is_expired(now) {
                    AttemptRecord::new(key, ttl, now)
                } else {
                    slot.get().increment(now)
                };
                slot.insert(Arc::new(next));
            }
            Entry::Vacant(slot) => {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Creating attempt record");
                slot.insert(Arc::new(AttemptRecord::new(key, ttl, now)));
            }
        }
    }

    /// The live record for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<AttemptRecord>> {
        let now = self.clock.now_millis();
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| Arc::clone(record.value()))
    }

    /// Attempts counted for `key` in its live window.
    pub fn attempts(&self, key: &str) -> Option<u32> {
        self.get(key).map(|record| record.attempts())
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut evicted = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Get the number of stored records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    ///
    /// A running sweeper notices the empty store on its next tick and stops.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Start the background sweeper.
    ///
    /// Returns `false` if it is already running or there is no tokio runtime
    /// with timers enabled to run it on.
    pub fn start_sweeper(&self) -> bool {
        let mut slot = self.sweeper.lock();
        if slot.as_ref().is_some_and(|sweeper| !sweeper.is_finished()) {
            return false;
        }
        if self.timers_unavailable.load(Ordering::Relaxed) {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                if !self.runtime_warned.swap(true, Ordering::Relaxed) {
                    warn!("No tokio runtime available, expired attempt records will only be removed by explicit sweeps");
                }
                return false;
            }
        };

        let id = self.next_sweeper_id.fetch_add(1, Ordering::Relaxed);
        let Some(sweeper) = Sweeper::spawn(id, self.this.clone(), self.sweep_interval, &runtime) else {
            self.timers_unavailable.store(true, Ordering::Relaxed);
            warn!("Tokio runtime has timers disabled, expired attempt records will only be removed by explicit sweeps");
            return false;
        };

        debug!(
            sweeper = id,
            interval_ms = self.sweep_interval.as_millis() as u64,
            "Starting sweeper"
        );
        *slot = Some(sweeper);
        true
    }

    /// Stop the background sweeper. Returns `false` if none was running.
    pub fn stop_sweeper(&self) -> bool {
        match self.sweeper.lock().take() {
            Some(sweeper) => {
                debug!(sweeper = sweeper.id(), "Stopping sweeper");
                sweeper.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a sweeper is currently scheduled.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }

    fn ensure_sweeper(&self) {
        if !self.is_sweeping() {
            self.start_sweeper();
        }
    }

    /// Called by sweeper `id` after each pass. Returns `true` when it should exit.
    ///
    /// Emptiness is checked under the slot lock, so a `record` racing with the
    /// last pass either keeps this sweeper alive or finds the slot free and
    /// starts a new one.
    pub(crate) fn release_sweeper(&self, id: u64) -> bool {
        let mut slot = self.sweeper.lock();
        match slot.as_ref() {
            Some(sweeper) if sweeper.id() == id => {
                if self.records.is_empty() {
                    *slot = None;
                    true
                } else {
                    false
                }
            }
            // Stopped or superseded
            _ => true,
        }
    }
}

impl AttemptStore for MemoryStore {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn can_access(&self, key: &str) -> bool {
        MemoryStore::can_access(self, key)
    }

    fn record(&self, key: &str, ttl: Duration) {
        MemoryStore::record(self, key, ttl)
    }

    fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        MemoryStore::try_acquire(self, key, ttl)
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records.len())
            .field("max_attempts", &self.max_attempts)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}
