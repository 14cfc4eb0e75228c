// src/llm/provider.rs
// Upstream provider abstraction

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{EnvConfig, ProviderKind};

/// The upstream reply, whatever its status. `body` is the parsed JSON when
/// the upstream sent JSON, otherwise the raw text wrapped as a string so the
/// gateway can forward it verbatim.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

impl ProviderResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse a raw upstream (status, text) pair.
    pub fn from_raw(status: u16, text: String) -> Self {
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Self { status, body }
    }
}

/// Trait implemented by each upstream adapter.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this adapter speaks to
    fn kind(&self) -> ProviderKind;

    /// Model substituted when the request omits one
    fn default_model(&self) -> &str;

    /// Forward an Anthropic-compatible request body upstream.
    /// Transport failures are errors; HTTP-level failures come back as a
    /// ProviderResponse carrying the upstream status and body.
    async fn send_messages(&self, payload: &Value) -> Result<ProviderResponse>;
}

/// Build the configured provider adapter.
pub fn create_provider(config: &EnvConfig) -> Result<std::sync::Arc<dyn ProviderClient>> {
    match config.provider.kind {
        ProviderKind::Databricks => Ok(std::sync::Arc::new(
            super::databricks::DatabricksClient::from_config(&config.provider)?,
        )),
        ProviderKind::AzureAnthropic => Ok(std::sync::Arc::new(
            super::azure::AzureAnthropicClient::from_config(&config.provider)?,
        )),
    }
}
