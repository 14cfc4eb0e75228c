// src/metrics.rs
// Process-wide request counters exposed at GET /metrics

use chrono::Utc;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

/// Request/response counters for the HTTP surface.
///
/// A single instance lives in the web state for the lifetime of the process.
/// Counters only ever increase; the snapshot is a point-in-time read.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    responses_success: AtomicU64,
    responses_error: AtomicU64,
    streaming_sessions: AtomicU64,
    cache_hits: AtomicU64,
    tool_calls: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, success: bool) {
        if success {
            self.responses_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.responses_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_streaming_session(&self) {
        self.streaming_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time counter snapshot for the `/metrics` endpoint.
    pub fn snapshot(&self) -> Value {
        json!({
            "requests": self.requests.load(Ordering::Relaxed),
            "responses": {
                "success": self.responses_success.load(Ordering::Relaxed),
                "error": self.responses_error.load(Ordering::Relaxed),
            },
            "streaming_sessions": self.streaming_sessions.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "tool_calls": self.tool_calls.load(Ordering::Relaxed),
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}
