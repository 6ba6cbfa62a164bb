//! services/client/src/mcq/cache.rs
//!
//! Memoizes results of side-effect-free lookups keyed by a canonical
//! serialization of the lookup parameters, with per-entry expiration.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

/// An in-memory cache with lazy eviction on read plus a background sweep
/// that bounds memory use from entries that are never re-read.
///
/// Must be constructed inside a Tokio runtime (the sweeper is spawned on it).
pub struct FingerprintCache<T> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<T>>>>,
    sweeper: JoinHandle<()>,
}

impl<T> Drop for FingerprintCache<T> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl<T: Clone + Send + 'static> FingerprintCache<T> {
    pub fn new() -> Self {
        let entries: Arc<Mutex<HashMap<String, CacheEntry<T>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sweeper = Self::spawn_sweeper(Arc::downgrade(&entries));
        Self { entries, sweeper }
    }

    /// Stores `data` under `key` with the default TTL.
    pub fn set(&self, key: impl Into<String>, data: T) {
        self.set_with_ttl(key, data, DEFAULT_TTL);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, data: T, ttl: Duration) {
        let entry = CacheEntry {
            data,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().unwrap().insert(key.into(), entry);
    }

    /// Returns the cached value, evicting it first if it has expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if Instant::now() <= entry.expires_at => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_sweeper(entries: Weak<Mutex<HashMap<String, CacheEntry<T>>>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await; // the first tick completes immediately
            loop {
                tick.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let mut entries = entries.lock().unwrap();
                let before = entries.len();
                entries.retain(|_, entry| now <= entry.expires_at);
                let evicted = before - entries.len();
                if evicted > 0 {
                    debug!("cache sweep evicted {evicted} expired entries");
                }
            }
        })
    }
}

impl<T: Clone + Send + 'static> Default for FingerprintCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces an identical key for parameter objects that are deeply equal
/// regardless of key insertion order, by sorting object keys recursively
/// before serialization.
pub fn generate_key<P: Serialize>(params: &P) -> String {
    let value = serde_json::to_value(params).unwrap_or(serde_json::Value::Null);
    canonicalize(&value).to_string()
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            pairs.sort_by_key(|(key, _)| key.as_str().to_owned());
            let mut sorted = serde_json::Map::new();
            for (key, inner) in pairs {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
