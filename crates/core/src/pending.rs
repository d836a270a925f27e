//! Targets with an update in flight, awaiting a healthy rollout.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::TargetKey;

/// Set of pending targets. Each call is a single critical section; the lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct PendingTracker {
    inner: Mutex<HashMap<TargetKey, Instant>>,
}

impl PendingTracker {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, HashMap<TargetKey, Instant>> {
        // every critical section leaves the map consistent, so poisoning is ignored
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `key` pending. Returns true when it was not pending before.
    /// Re-marking keeps one entry and restarts its clock.
    pub fn mark_pending(&self, key: TargetKey) -> bool {
        self.lock().insert(key, Instant::now()).is_none()
    }

    pub fn is_pending(&self, key: &TargetKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove `key`. Returns true only for the caller that actually removed it.
    pub fn clear_pending(&self, key: &TargetKey) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn pending(&self) -> Vec<TargetKey> {
        let mut keys: Vec<TargetKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Remove and return entries marked more than `max_age` ago.
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<TargetKey> {
        self.expire_at(Instant::now(), max_age)
    }

    fn expire_at(&self, now: Instant, max_age: Duration) -> Vec<TargetKey> {
        let mut map = self.lock();
        let mut expired: Vec<TargetKey> = map
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            map.remove(k);
        }
        expired.sort();
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(w: &str) -> TargetKey { TargetKey::new("backend", w) }

    #[test]
    fn mark_is_idempotent() {
        let t = PendingTracker::new();
        assert!(t.mark_pending(key("auth")));
        assert!(!t.mark_pending(key("auth")));
        assert_eq!(t.len(), 1);
        assert!(t.is_pending(&key("auth")));
    }

    #[test]
    fn clear_reports_removal_once() {
        let t = PendingTracker::new();
        t.mark_pending(key("auth"));
        assert!(t.clear_pending(&key("auth")));
        assert!(!t.clear_pending(&key("auth")));
        assert!(t.is_empty());
    }

    #[test]
    fn expire_removes_only_old_entries() {
        let t = PendingTracker::new();
        t.mark_pending(key("old"));
        let later = Instant::now() + Duration::from_secs(120);
        assert!(t.expire_at(later, Duration::from_secs(3600)).is_empty());
        assert_eq!(t.expire_at(later, Duration::from_secs(60)), vec![key("old")]);
        assert!(!t.is_pending(&key("old")));
    }

    #[test]
    fn concurrent_clear_has_single_winner() {
        let t = Arc::new(PendingTracker::new());
        t.mark_pending(key("auth"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || t.clear_pending(&key("auth")))
            })
            .collect();
        let winners = handles.into_iter().filter_map(|h| h.join().ok()).filter(|won| *won).count();
        assert_eq!(winners, 1);
    }
}
