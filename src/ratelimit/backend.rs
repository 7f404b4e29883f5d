//! Attempt store trait for abstracting store implementations.

use std::time::Duration;

/// Trait for attempt store implementations.
///
/// This trait lets a [`crate::middleware::BlockGuard`] work against any
/// store, including one shared explicitly between several guards.
pub trait AttemptStore: Send + Sync {
    /// The ceiling of accepted attempts per window.
    fn max_attempts(&self) -> u32;

    /// Whether `key` has attempts left. Never mutates.
    fn can_access(&self, key: &str) -> bool;

    /// Count one accepted attempt for `key`.
    fn record(&self, key: &str, ttl: Duration);

    /// Check and record in one step.
    ///
    /// Returns `false` without recording when `key` is at its ceiling. The
    /// default is only atomic on single-threaded hosts; implementations
    /// shared across threads must override it.
    fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        if !self.can_access(key) {
            return false;
        }
        self.record(key, ttl);
        true
    }
}
