//! Dedup window: storage keys admitted within the last TTL
//!
//! Entries are only removed by [`TimeoutMap::delete_outdated`], never on task
//! completion, so a finished key stays suppressed until its window expires.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// TTL map from storage key to admission time
#[derive(Debug)]
pub struct TimeoutMap {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TimeoutMap {
    /// Create an empty window with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Window length
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True if `key` was admitted less than one TTL ago
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(key)
            .is_some_and(|added| added.elapsed() < self.ttl)
    }

    /// Record `key` with the current time; re-adding resets the timestamp
    pub fn add(&self, key: &str) {
        self.entries.lock().insert(key.to_string(), Instant::now());
    }

    /// `contains` + `add` under one lock.
    ///
    /// Returns true if the caller won the key and should go on with admission.
    pub fn try_admit(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        if let Some(added) = entries.get(key) {
            if added.elapsed() < self.ttl {
                return false;
            }
        }
        entries.insert(key.to_string(), Instant::now());
        true
    }

    /// Remove every entry older than the TTL, returning how many were removed
    pub fn delete_outdated(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, added| added.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of tracked keys, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_contains() {
        let map = TimeoutMap::new(Duration::from_secs(60));
        assert!(!map.contains("42/a.css"));

        map.add("42/a.css");
        assert!(map.contains("42/a.css"));
        assert!(!map.contains("42/b.css"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_try_admit_only_once() {
        let map = TimeoutMap::new(Duration::from_secs(60));
        assert!(map.try_admit("js/abc.js"));
        assert!(!map.try_admit("js/abc.js"));
        assert!(map.contains("js/abc.js"));
    }

    #[test]
    fn test_expired_entries() {
        let map = TimeoutMap::new(Duration::from_millis(20));
        map.add("k");
        std::thread::sleep(Duration::from_millis(40));

        assert!(!map.contains("k"));
        // Still stored until swept
        assert_eq!(map.len(), 1);
        // An expired key can be admitted again
        assert!(map.try_admit("k"));
    }

    #[test]
    fn test_delete_outdated() {
        let map = TimeoutMap::new(Duration::from_millis(30));
        map.add("old-1");
        map.add("old-2");
        std::thread::sleep(Duration::from_millis(50));
        map.add("fresh");

        assert_eq!(map.delete_outdated(), 2);
        assert_eq!(map.len(), 1);
        assert!(map.contains("fresh"));
        assert_eq!(map.delete_outdated(), 0);
    }

    #[test]
    fn test_concurrent_admission_admits_once() {
        let map = Arc::new(TimeoutMap::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || map.try_admit("42/shared.png"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(admitted, 1);
    }
}
