use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

struct CacheEntry {
    fetched: Instant,
    listing: Vec<String>,
}

/// Time bound cache of service instance listings, keyed by absolute service path.
///
/// Each `ServiceProvider` owns one unless a cache is explicitly shared with
/// `ServiceProvider::with_cache`.
pub struct ListingCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> ListingCache {
        ListingCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Return an unexpired listing for the path, evicting expired entries.
    pub fn get(&self, path: &str) -> Option<Vec<String>> {
        let mut entries = self.entries.lock().expect("ListingCache::entries lock poisoned");
        let expired = match entries.get(path) {
            None => return None,
            Some(entry) => entry.fetched.elapsed() >= self.ttl,
        };
        if expired {
            entries.remove(path);
            return None;
        }
        entries.get(path).map(|entry| entry.listing.clone())
    }

    /// Cache a listing for the path; empty listings are never cached.
    pub fn insert<S: Into<String>>(&self, path: S, listing: Vec<String>) {
        if listing.is_empty() {
            return;
        }
        let entry = CacheEntry {
            fetched: Instant::now(),
            listing,
        };
        self.entries
            .lock()
            .expect("ListingCache::entries lock poisoned")
            .insert(path.into(), entry);
    }

    pub fn invalidate(&self, path: &str) {
        self.entries
            .lock()
            .expect("ListingCache::entries lock poisoned")
            .remove(path);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
