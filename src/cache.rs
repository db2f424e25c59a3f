// src/cache.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Time-bounded cache of presigned download URLs, keyed by resolved object
//! path. Entries go stale after `PRESIGN_CACHE_TTL_SECS`, strictly inside the
//! validity window requested from the signer, so a cached URL is never served
//! past expiry. Eviction is lazy: a stale entry is dropped on the next lookup
//! for that same path, never proactively.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::PRESIGN_CACHE_TTL_SECS;

pub struct PresignedUrlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for PresignedUrlCache {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(PRESIGN_CACHE_TTL_SECS))
    }
}

impl PresignedUrlCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.get_at(path, Instant::now())
    }

    pub fn insert(&self, path: &str, url: String) {
        self.insert_at(path, url, Instant::now());
    }

    /// Lookup with an explicit clock; stale entries are removed on the spot.
    pub fn get_at(&self, path: &str, now: Instant) -> Option<String> {
        let mut entries = self.entries.lock().expect("presign cache poisoned");
        match entries.get(path) {
            Some((_, issued)) if now.duration_since(*issued) > self.ttl => {
                entries.remove(path);
                None
            }
            Some((url, _)) => Some(url.clone()),
            None => None,
        }
    }

    pub fn insert_at(&self, path: &str, url: String, now: Instant) {
        let mut entries = self.entries.lock().expect("presign cache poisoned");
        entries.insert(path.to_owned(), (url, now));
    }
}
