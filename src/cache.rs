//! In-memory TTL cache for outbound GET responses.
//!
//! Entries are decoded JSON payloads keyed by `METHOD:url`. Expiry is checked
//! on read; a stale entry is dropped the next time its key is looked up, there
//! is no background sweeper.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

/// Default lifetime of a cached response.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Source of wall-clock time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Builds the cache key for a request.
pub fn cache_key(method: &Method, url: &str) -> String {
    format!("{}:{}", method.as_str(), url)
}

#[derive(Clone)]
struct CacheEntry {
    payload: Value,
    stored_at: DateTime<Utc>,
}

/// Process-local response cache with a single TTL.
pub struct RequestCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.stored_at <= self.ttl
    }

    /// Returns the cached payload if it is still within the TTL.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if self.is_fresh(entry, now) => return Some(entry.payload.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock: another caller may have refreshed it.
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| !self.is_fresh(entry, now))
        {
            entries.remove(key);
            debug!("Evicted stale cache entry {}", key);
        }
        None
    }

    /// Stores a payload, replacing whatever was there.
    pub fn put(&self, key: String, payload: Value) {
        let stored_at = self.clock.now();
        self.entries
            .write()
            .insert(key, CacheEntry { payload, stored_at });
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: parking_lot::Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn setup() -> (Arc<ManualClock>, RequestCache) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let cache = RequestCache::new(Duration::hours(DEFAULT_TTL_HOURS), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_key_includes_method() {
        assert_eq!(
            cache_key(&Method::GET, "https://pdb.test/api/net"),
            "GET:https://pdb.test/api/net"
        );
    }

    #[test]
    fn test_hit_within_ttl() {
        let (clock, cache) = setup();
        cache.put("GET:a".into(), json!([1, 2]));
        clock.advance(Duration::hours(23));
        assert_eq!(cache.get("GET:a"), Some(json!([1, 2])));
    }

    #[test]
    fn test_hit_at_exact_ttl() {
        let (clock, cache) = setup();
        cache.put("GET:a".into(), json!("x"));
        clock.advance(Duration::hours(24));
        assert!(cache.get("GET:a").is_some());
    }

    #[test]
    fn test_stale_entry_is_evicted_on_read() {
        let (clock, cache) = setup();
        cache.put("GET:a".into(), json!("x"));
        cache.put("GET:b".into(), json!("y"));
        clock.advance(Duration::hours(24) + Duration::seconds(1));

        assert_eq!(cache.get("GET:a"), None);
        // Only the key that was read is removed.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_overwrites_and_resets_age() {
        let (clock, cache) = setup();
        cache.put("GET:a".into(), json!(1));
        clock.advance(Duration::hours(20));
        cache.put("GET:a".into(), json!(2));
        clock.advance(Duration::hours(20));
        assert_eq!(cache.get("GET:a"), Some(json!(2)));
    }

    #[test]
    fn test_clear() {
        let (_clock, cache) = setup();
        cache.put("GET:a".into(), json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
