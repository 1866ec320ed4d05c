//! In-memory TTL cache with least-recently-used eviction.
//!
//! Values are stored as JSON so one cache can hold the results of every
//! catalog operation. Keys are derived from the operation name and its
//! parameters, so callers never build keys by hand.

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::RuleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(300),
        }
    }
}

struct CacheEntry {
    value: serde_json::Value,
    inserted: Instant,
    last_access: Instant,
}

pub struct RuleCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RuleCache {
    pub fn new(config: CacheConfig) -> Self {
        tracing::info!(
            "Rule cache initialised with max_entries={}, ttl={}s",
            config.max_entries,
            config.ttl.as_secs()
        );
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Build the cache key for `method` called with `params`. Parameter order
    /// does not matter. Values are escaped so `&` and `=` inside a value
    /// cannot forge another parameter list.
    pub fn key(method: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, escape_value(v)))
            .collect::<Vec<_>>()
            .join("&");
        hex::encode(Sha256::digest(format!("{}:{}", method, joined).as_bytes()))
    }

    /// Return the cached value for `method(params)` or run `fetch` and cache
    /// its result. Fetch errors are returned as-is and leave the cache alone.
    pub fn get_or_fetch<T, F>(&self, method: &str, params: &[(&str, &str)], fetch: F) -> RuleResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> RuleResult<T>,
    {
        let key = Self::key(method, params);

        if let Some(value) = self.lookup(&key) {
            match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    tracing::debug!(method, ?params, "Cache hit");
                    return Ok(hit);
                }
                Err(e) => {
                    tracing::warn!(method, "Discarding undecodable cache entry: {}", e);
                    self.remove_key(&key);
                }
            }
        }

        tracing::debug!(method, ?params, "Cache miss");
        let fetched = fetch().inspect_err(|e| {
            tracing::error!(method, "Failed to fetch data: {}", e);
        })?;
        let value = serde_json::to_value(&fetched)?;
        self.insert(key, value);
        Ok(fetched)
    }

    /// Drop the entry for `method(params)`, if any.
    pub fn invalidate(&self, method: &str, params: &[(&str, &str)]) -> bool {
        let removed = self.remove_key(&Self::key(method, params));
        if removed {
            tracing::info!(method, ?params, "Invalidated cache entry");
        }
        removed
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().ok()?;
        let ttl = self.config.ttl;
        let expired = match entries.get_mut(key) {
            Some(entry) if entry.inserted.elapsed() < ttl => {
                entry.last_access = Instant::now();
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    fn insert(&self, key: String, value: serde_json::Value) {
        if self.config.max_entries == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::info!("Evicting least recently used cache entry {}", oldest);
                entries.remove(&oldest);
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted: now,
                last_access: now,
            },
        );
    }

    fn remove_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(key).is_some())
            .unwrap_or(false)
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(ch),
        }
    }
    out
}
