// src/tools/web.rs
// Web tools: search against the configured endpoint, bounded page fetches

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::context::ToolContext;
use crate::config::WebSearchConfig;
use crate::llm::ToolCall;

/// Keep at most this many characters of a fetched page.
const MAX_FETCH_CHARS: usize = 100_000;

/// HTTP client for the web tools (search endpoint + page fetches).
pub struct WebClient {
    config: WebSearchConfig,
    http: Client,
}

impl WebClient {
    pub fn new(config: WebSearchConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, http }
    }

    /// Query the configured search endpoint.
    pub async fn search(&self, query: &str) -> Result<String, String> {
        let url = format!(
            "{}?q={}",
            self.config.endpoint,
            urlencoding::encode(query)
        );
        debug!(url = %url, "Web search");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("search endpoint returned {status}: {body}"));
        }
        Ok(truncate(body, MAX_FETCH_CHARS))
    }

    /// Fetch a page, enforcing the host allowlist.
    pub async fn fetch(&self, url: &str) -> Result<String, String> {
        self.check_host(url)?;
        debug!(url = %url, "Web fetch");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("fetch failed: {e}"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("fetch returned {status}"));
        }
        Ok(truncate(body, MAX_FETCH_CHARS))
    }

    /// Reject URLs whose host is not allowlisted (unless allow-all is set).
    fn check_host(&self, url: &str) -> Result<(), String> {
        if self.config.allow_all_hosts {
            return Ok(());
        }
        let host = host_of(url).ok_or_else(|| format!("cannot parse URL: {url}"))?;
        let allowed = self.config.allowed_hosts.iter().any(|candidate| {
            host == *candidate || host.ends_with(&format!(".{candidate}"))
        });
        if allowed {
            Ok(())
        } else {
            Err(format!("host '{host}' is not in the fetch allowlist"))
        }
    }
}

/// Pull the host out of an http(s) URL without a full URL parser.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or(authority)
        .split(':')
        .next()
        .unwrap_or(authority);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        text.truncate(max);
        text.push_str("\n... [truncated]");
    }
    text
}

/// Search the web through the configured endpoint.
pub async fn web_search(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let query = call
        .str_arg(&["query", "q", "search", "text"])
        .ok_or_else(|| "missing required argument: query".to_string())?;
    ctx.web().search(&query).await
}

/// Fetch a single page (bounded, host-allowlisted).
pub async fn web_fetch(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let url = call
        .str_arg(&["url", "uri", "link", "query"])
        .ok_or_else(|| "missing required argument: url".to_string())?;
    // A bare query arrives when the fallback path synthesizes this call;
    // route it through search instead of failing on a non-URL.
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return ctx.web().search(&url).await;
    }
    ctx.web().fetch(&url).await
}
