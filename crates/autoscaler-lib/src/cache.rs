//! Keyed store whose entries expire a fixed TTL after insertion
//!
//! While the jitter toggle is on, each insertion's expiry is pushed out by a
//! uniform draw from the jitter range so bulk-populated entries do not all
//! expire on the same tick.

use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Default entry lifetime (20 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(20 * 60);

/// Default jitter bounds applied to bulk insertions
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_secs(120);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ExpirationCache<K, V> {
    ttl: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    jitter: bool,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpirationCache<K, V> {
    pub fn new(ttl: Duration, jitter_min: Duration, jitter_max: Duration) -> Self {
        Self {
            ttl,
            jitter_min: jitter_min.min(jitter_max),
            jitter_max,
            jitter: false,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn jitter_max(&self) -> Duration {
        self.jitter_max
    }

    pub fn set_jitter(&mut self, enabled: bool) {
        self.jitter = enabled;
    }

    fn lifetime(&self) -> Duration {
        if !self.jitter || self.jitter_max.is_zero() {
            return self.ttl;
        }
        let extra = rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max);
        self.ttl + extra
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        let expires_at = now + self.lifetime();
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Live value for `key`; expired entries are dropped on read
    pub fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).map(|e| e.expires_at)
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
