//! Per-fingerprint attempt records.

use std::time::Duration;

/// The attempt counter and expiry for one fingerprint.
///
/// Records are immutable: an increment produces a new record which replaces
/// the old one in the store. Every increment pushes the expiry forward by the
/// record's own ttl, which makes the window sliding rather than fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Fingerprint this record belongs to
    key: String,
    /// Epoch milliseconds after which the record may be evicted
    expires_at: u64,
    /// Accepted requests seen within the current window
    attempts: u32,
    /// Window length used to recompute `expires_at`
    ttl: Duration,
}

impl AttemptRecord {
    /// Create a first-sighting record with one attempt.
    pub fn new(key: impl Into<String>, ttl: Duration, now: u64) -> Self {
        Self {
            key: key.into(),
            expires_at: expiry(now, ttl),
            attempts: 1,
            ttl,
        }
    }

    /// A copy with one more attempt and a refreshed expiry.
    pub fn increment(&self, now: u64) -> Self {
        Self {
            key: self.key.clone(),
            expires_at: expiry(now, self.ttl),
            attempts: self.attempts.saturating_add(1),
            ttl: self.ttl,
        }
    }

    /// Whether the window has elapsed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Time left before the record becomes evictable.
    pub fn remaining(&self, now: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

fn expiry(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(ttl.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_new_record_starts_at_one() {
        let record = AttemptRecord::new("[1.2.3.4][GET][/]", TTL, 5_000);

        assert_eq!(record.attempts(), 1);
        assert_eq!(record.expires_at(), 15_000);
        assert_eq!(record.ttl(), TTL);
        assert_eq!(record.key(), "[1.2.3.4][GET][/]");
    }

    #[test]
    fn test_increment_slides_window() {
        let record = AttemptRecord::new("k", TTL, 0);
        let next = record.increment(4_000);

        assert_eq!(next.attempts(), 2);
        assert_eq!(next.expires_at(), 14_000);
        assert_eq!(next.key(), "k");

        // The previous record is untouched
        assert_eq!(record.attempts(), 1);
        assert_eq!(record.expires_at(), 10_000);
    }

    #[test]
    fn test_expiry_is_strictly_after() {
        let record = AttemptRecord::new("k", TTL, 0);

        assert!(!record.is_expired(9_999));
        assert!(!record.is_expired(10_000));
        assert!(record.is_expired(10_001));
    }

    #[test]
    fn test_remaining() {
        let record = AttemptRecord::new("k", TTL, 0);

        assert_eq!(record.remaining(4_000), Duration::from_secs(6));
        assert_eq!(record.remaining(20_000), Duration::ZERO);
    }
}
