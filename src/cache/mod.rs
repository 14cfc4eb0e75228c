// src/cache/mod.rs
// Prompt cache: content-addressed LRU with TTL
//
// Admission is tool-use aware: only terminal (no tool calls) 200 responses
// are stored, so a hit can always be returned without replaying tools.
// Lookups and stores hand out deep clones, never the stored reference.

pub mod key;

pub use key::cache_key;

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheConfig;
use crate::llm::parse_assistant;

struct CacheEntry {
    response: Value,
    created_at: Instant,
    expires_at: Option<Instant>,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// LRU order, most recently used at the back
    order: VecDeque<String>,
}

/// Content-addressed response cache.
pub struct PromptCache {
    enabled: bool,
    max_entries: usize,
    ttl: Option<Duration>,
    inner: Mutex<CacheInner>,
}

impl PromptCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_entries: config.max_entries.max(1),
            ttl: (config.ttl_ms > 0).then(|| Duration::from_millis(config.ttl_ms)),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a live entry. Returns a deep clone and refreshes LRU order.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.lookup_at(key, Instant::now())
    }

    fn lookup_at(&self, key: &str, now: Instant) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|deadline| now >= deadline),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            debug!(key = %short(key), "Prompt cache entry expired");
            return None;
        }

        // Move to the back (most recently used)
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        inner.entries.get(key).map(|entry| entry.response.clone())
    }

    /// Store a response if the admission rule allows it: ok status, 200, and
    /// no tool calls in the assistant message.
    pub fn admit(&self, key: &str, status: u16, response: &Value) {
        self.admit_at(key, status, response, Instant::now())
    }

    fn admit_at(&self, key: &str, status: u16, response: &Value, now: Instant) {
        if !self.enabled || status != 200 {
            return;
        }
        match parse_assistant(response) {
            Some(parsed) if !parsed.has_tool_calls() => {}
            _ => return,
        }

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.entries.contains_key(key) {
            inner.order.retain(|k| k != key);
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                response: response.clone(),
                created_at: now,
                expires_at: self.ttl.map(|ttl| now + ttl),
            },
        );
        inner.order.push_back(key.to_string());

        // Evict from the head (least recently used) past the cap
        while inner.entries.len() > self.max_entries {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
                debug!(key = %short(&evicted), "Prompt cache evicted LRU entry");
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of an entry, if present (diagnostics only).
    pub fn entry_age(&self, key: &str) -> Option<Duration> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .entries
            .get(key)
            .map(|entry| entry.created_at.elapsed())
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
