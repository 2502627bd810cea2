use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use optionflow_core::path::stable_key;
use optionflow_core::ResolveResult;

/// Longest lifetime any entry gets; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

struct CacheEntry {
    result: ResolveResult,
    expires_at: Instant,
}

/// Resolved-result cache with per-entry TTL.
///
/// Reads are concurrent; concurrent inserts for the same key are
/// last-writer-wins. Expired entries are dropped on access, and purged in
/// bulk when the cache reaches `max_entries`.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<ResolveResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.result.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            debug!(key, "Evicted expired cache entry");
        }
        None
    }

    pub fn insert(&self, key: String, result: ResolveResult, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries {
                debug!(entries = entries.len(), "Result cache full, clearing");
                entries.clear();
            }
        }
        entries.insert(
            key,
            CacheEntry {
                result,
                expires_at: now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for one resolution.
pub fn cache_key(function_id: &str, args: &Value, context_version: &str, runtime_version: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        function_id,
        stable_key(args),
        context_version,
        runtime_version
    )
}
