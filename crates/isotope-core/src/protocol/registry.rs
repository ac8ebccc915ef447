//! Correlation of replies to requests by sequence number
//!
//! The reader task inserts every decoded reply here; callers take the reply
//! for the sequence they sent. A sequence can receive more than one reply
//! (ACK, then SUC/ABT for long-running commands), so an entry only holds the
//! most recent unconsumed reply and a later insert overwrites it.
//!
//! Sequences nobody will read from again (heartbeats, timed-out requests,
//! abandoned motions) are ignored: every reply for them is dropped until the
//! dispatcher hands the number out again and [`arm`](ResponseRegistry::arm)s it.
//!
//! The map is guarded by a mutex that is only held for map operations. Waiters
//! block on a condition variable, which releases the mutex while sleeping, so
//! the reader task is never held up by a slow consumer.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::Reply;

#[derive(Default)]
struct Entries {
    replies: HashMap<u16, Reply>,
    /// Sequences whose replies nobody will consume
    ignored: HashSet<u16>,
}

/// Sequence number -> most recent reply
#[derive(Default)]
pub struct ResponseRegistry {
    entries: Mutex<Entries>,
    inserted: Condvar,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store (or overwrite) the reply for its sequence and wake waiters.
    ///
    /// Returns false when the reply was discarded because its sequence was
    /// marked with [`ignore`](Self::ignore).
    pub fn insert(&self, reply: Reply) -> bool {
        let mut entries = self.lock();
        if entries.ignored.contains(&reply.sequence) {
            return false;
        }
        entries.replies.insert(reply.sequence, reply);
        drop(entries);
        self.inserted.notify_all();
        true
    }

    /// Remove and return the reply for `sequence` if one is present
    pub fn try_take(&self, sequence: u16) -> Option<Reply> {
        self.lock().replies.remove(&sequence)
    }

    /// Wait up to `timeout` for a reply to `sequence`, then remove and return it
    pub fn take_blocking(&self, sequence: u16, timeout: Duration) -> Option<Reply> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        loop {
            if let Some(reply) = entries.replies.remove(&sequence) {
                return Some(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            entries = self
                .inserted
                .wait_timeout(entries, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Discard every reply for `sequence` until it is [`arm`](Self::arm)ed again.
    ///
    /// Used for fire-and-forget commands and for requests that already timed
    /// out, so late replies (an ACK and its completion alike) do not pile up.
    /// A reply already stored is dropped now.
    pub fn ignore(&self, sequence: u16) {
        let mut entries = self.lock();
        entries.replies.remove(&sequence);
        entries.ignored.insert(sequence);
    }

    /// Start a fresh use of `sequence`: forget whatever its previous use left
    /// behind, stored reply or ignore mark
    pub fn arm(&self, sequence: u16) {
        let mut entries = self.lock();
        entries.replies.remove(&sequence);
        entries.ignored.remove(&sequence);
    }

    /// Whether replies for `sequence` are being dropped
    pub fn is_ignored(&self, sequence: u16) -> bool {
        self.lock().ignored.contains(&sequence)
    }

    /// Whether a reply is waiting for `sequence`
    pub fn contains(&self, sequence: u16) -> bool {
        self.lock().replies.contains_key(&sequence)
    }

    /// Number of unconsumed replies
    pub fn len(&self) -> usize {
        self.lock().replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (connection teardown)
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.replies.clear();
        entries.ignored.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyStatus;
    use std::sync::Arc;
    use std::thread;

    fn reply(seq: u16, status: ReplyStatus) -> Reply {
        Reply::new(seq, "", status)
    }

    #[test]
    fn test_insert_then_take() {
        let registry = ResponseRegistry::new();
        assert!(registry.insert(reply(3, ReplyStatus::Succeeded)));
        assert!(registry.contains(3));
        assert_eq!(registry.try_take(3).unwrap().status, ReplyStatus::Succeeded);
        assert!(registry.try_take(3).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = ResponseRegistry::new();
        registry.insert(reply(42, ReplyStatus::Acknowledged));
        registry.insert(reply(42, ReplyStatus::Succeeded));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.try_take(42).unwrap().status, ReplyStatus::Succeeded);
    }

    #[test]
    fn test_take_blocking_wakes_on_insert() {
        let registry = Arc::new(ResponseRegistry::new());
        let inserter = registry.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            inserter.insert(reply(9, ReplyStatus::Succeeded));
        });

        let start = Instant::now();
        let got = registry.take_blocking(9, Duration::from_secs(2));
        assert_eq!(got.unwrap().sequence, 9);
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_take_blocking_times_out() {
        let registry = ResponseRegistry::new();
        registry.insert(reply(1, ReplyStatus::Succeeded));
        let start = Instant::now();
        assert!(registry.take_blocking(2, Duration::from_millis(100)).is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(600));
        // Other sequences are untouched
        assert!(registry.contains(1));
    }

    #[test]
    fn test_ignored_sequence_drops_every_phase() {
        let registry = ResponseRegistry::new();
        registry.ignore(5);
        assert!(!registry.insert(reply(5, ReplyStatus::Acknowledged)));
        assert!(!registry.insert(reply(5, ReplyStatus::Succeeded)));
        assert!(registry.is_empty());
        assert!(registry.is_ignored(5));
    }

    #[test]
    fn test_ignore_drops_stored_reply() {
        let registry = ResponseRegistry::new();
        registry.insert(reply(5, ReplyStatus::Succeeded));
        registry.ignore(5);
        assert!(registry.is_empty());
        assert!(!registry.insert(reply(5, ReplyStatus::Aborted)));
    }

    #[test]
    fn test_arm_clears_previous_use() {
        let registry = ResponseRegistry::new();
        registry.ignore(5);
        registry.insert(reply(6, ReplyStatus::Acknowledged));

        registry.arm(5);
        registry.arm(6);
        assert!(!registry.is_ignored(5));
        assert!(registry.is_empty());

        assert!(registry.insert(reply(5, ReplyStatus::Succeeded)));
        assert_eq!(registry.try_take(5).unwrap().status, ReplyStatus::Succeeded);
    }

    #[test]
    fn test_concurrent_waiters_on_distinct_sequences() {
        let registry = Arc::new(ResponseRegistry::new());
        let waiters: Vec<_> = (0..8u16)
            .map(|seq| {
                let registry = registry.clone();
                thread::spawn(move || registry.take_blocking(seq, Duration::from_secs(2)))
            })
            .collect();

        for seq in (0..8u16).rev() {
            registry.insert(reply(seq, ReplyStatus::Succeeded));
        }

        for (seq, waiter) in waiters.into_iter().enumerate() {
            let got = waiter.join().unwrap().unwrap();
            assert_eq!(got.sequence, seq as u16);
        }
        assert!(registry.is_empty());
    }
}
