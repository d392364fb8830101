//! Injected capabilities: identifier and timestamp generation.
//!
//! The kernel never reaches for the wall clock or a randomness source
//! directly; both come in through these two traits so embedders (and
//! tests) can make every ledger fully deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::event::Timestamp;

/// Produces unique identifiers for entities and events.
pub trait IdSource: Send {
    /// The next unique identifier.
    fn next_id(&mut self) -> String;
}

/// Produces the current time.
pub trait Clock: Send {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + Send + Sync + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Default identifier source: random UUID v4 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Default clock: the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic identifier source: `"1"`, `"2"`, `"3"`, ...
#[derive(Debug, Clone)]
pub struct SequenceIds {
    next: u64,
}

impl SequenceIds {
    /// Start counting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for SequenceIds {
    fn next_id(&mut self) -> String {
        let id = self.next;
        self.next += 1;
        id.to_string()
    }
}

/// A clock whose time is set by hand.
///
/// Share it with the ledger through an [`Arc`] and the test (or embedder)
/// keeps control of time while the ledger reads it:
///
/// ```
/// use std::sync::Arc;
/// use ledgerfold::{Clock, ManualClock};
///
/// let clock = Arc::new(ManualClock::new(1_000));
/// assert_eq!(clock.now(), 1_000);
/// clock.advance(500);
/// assert_eq!(clock.now(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// A clock frozen at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(at),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, at: Timestamp) {
        self.now.store(at, Ordering::Relaxed);
    }

    /// Move forward by `by` milliseconds.
    pub fn advance(&self, by: u64) {
        self.now.fetch_add(by, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let mut ids = UuidIds;
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn sequence_ids_count_up() {
        let mut ids = SequenceIds::starting_at(10_000);
        assert_eq!(ids.next_id(), "10000");
        assert_eq!(ids.next_id(), "10001");
    }

    #[test]
    fn manual_clock_is_controlled_by_hand() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.set(200);
        assert_eq!(clock.now(), 200);
        clock.advance(50);
        assert_eq!(clock.now(), 250);
    }

    #[test]
    fn shared_manual_clock_reads_through_arc() {
        let clock = Arc::new(ManualClock::new(1));
        let view: &dyn Clock = &clock;
        clock.advance(9);
        assert_eq!(view.now(), 10);
    }

    #[test]
    fn system_clock_is_past_2020() {
        // 2020-01-01 in Unix millis.
        assert!(SystemClock.now() > 1_577_836_800_000);
    }
}
