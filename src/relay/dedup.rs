//! Chat deduplication cache
//!
//! Remembers recently relayed `(room, sender, content)` triples so identical chat
//! payloads arriving within the suppression window are dropped instead of re-delivered.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default suppression window
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Expired entries are swept once the cache grows past this size
const SWEEP_THRESHOLD: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatDedupKey {
    pub room: String,
    pub sender: String,
    pub content: String,
}

impl ChatDedupKey {
    pub fn new(room: &str, sender: &str, content: &str) -> Self {
        Self {
            room: room.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
        }
    }
}

/// Short-lived memo of relayed chat payloads
///
/// # Example
///
/// ```rust
/// use raidcast::relay::{ChatDedupCache, ChatDedupKey};
///
/// let cache = ChatDedupCache::default();
/// let key = ChatDedupKey::new("raid", "thrall", "pull in 10");
///
/// assert!(cache.check_and_insert(&key));
/// assert!(!cache.check_and_insert(&key));
/// ```
pub struct ChatDedupCache {
    seen: Mutex<HashMap<ChatDedupKey, Instant>>,
    window: Duration,
}

impl ChatDedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` if the message should be relayed and records it.
    ///
    /// Check and insert happen under one lock, so of two identical messages racing
    /// in from different connections exactly one wins.
    pub fn check_and_insert(&self, key: &ChatDedupKey) -> bool {
        self.check_and_insert_at(key, Instant::now())
    }

    /// [`Self::check_and_insert`] against an explicit clock reading
    pub fn check_and_insert_at(&self, key: &ChatDedupKey, now: Instant) -> bool {
        let mut seen = self.seen.lock();

        if let Some(last) = seen.get(key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        if seen.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            seen.retain(|_, last| now.saturating_duration_since(*last) < window);
        }

        seen.insert(key.clone(), now);
        true
    }

    /// Drop every entry older than the window
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        self.seen
            .lock()
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for ChatDedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key() -> ChatDedupKey {
        ChatDedupKey::new("raid", "thrall", "pull in 10")
    }

    #[test]
    fn test_suppressed_within_window() {
        let cache = ChatDedupCache::default();
        let t0 = Instant::now();

        assert!(cache.check_and_insert_at(&key(), t0));
        assert!(!cache.check_and_insert_at(&key(), t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_delivered_again_after_window() {
        let cache = ChatDedupCache::default();
        let t0 = Instant::now();

        assert!(cache.check_and_insert_at(&key(), t0));
        assert!(cache.check_and_insert_at(&key(), t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_suppressed_copy_does_not_extend_window() {
        let cache = ChatDedupCache::default();
        let t0 = Instant::now();

        assert!(cache.check_and_insert_at(&key(), t0));
        assert!(!cache.check_and_insert_at(&key(), t0 + Duration::from_secs(3)));
        assert!(cache.check_and_insert_at(&key(), t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_key_components_are_distinct() {
        let cache = ChatDedupCache::default();

        assert!(cache.check_and_insert(&ChatDedupKey::new("raid", "a", "hi")));
        assert!(cache.check_and_insert(&ChatDedupKey::new("raid", "b", "hi")));
        assert!(cache.check_and_insert(&ChatDedupKey::new("pvp", "a", "hi")));
        assert!(cache.check_and_insert(&ChatDedupKey::new("raid", "a", "hello")));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_concurrent_identical_messages_deliver_once() {
        let cache = Arc::new(ChatDedupCache::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.check_and_insert(&key()))
            })
            .collect();

        let delivered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|delivered| *delivered)
            .count();
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_evict_expired() {
        let cache = ChatDedupCache::new(Duration::from_millis(20));
        cache.check_and_insert(&key());
        assert!(!cache.is_empty());

        thread::sleep(Duration::from_millis(40));
        cache.evict_expired();
        assert!(cache.is_empty());
    }
}
