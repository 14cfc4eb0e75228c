// src/llm/azure.rs
// Azure-hosted Anthropic adapter

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::http_client::LlmHttpClient;
use super::provider::{ProviderClient, ProviderResponse};
use crate::config::{ProviderConfig, ProviderKind};

const DEFAULT_AZURE_MODEL: &str = "claude-sonnet-4";

/// Azure Anthropic client. Unlike Databricks, the endpoint URL is fixed and
/// the model travels in the body.
pub struct AzureAnthropicClient {
    endpoint: String,
    api_key: String,
    anthropic_version: String,
    default_model: String,
    http: LlmHttpClient,
}

impl AzureAnthropicClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let endpoint = config
            .azure_endpoint
            .clone()
            .context("AZURE_ANTHROPIC_ENDPOINT is not set")?;
        let api_key = config
            .azure_api_key
            .clone()
            .context("AZURE_ANTHROPIC_API_KEY is not set")?;
        Ok(Self {
            endpoint,
            api_key,
            anthropic_version: config.azure_anthropic_version.clone(),
            default_model: DEFAULT_AZURE_MODEL.to_string(),
            http: LlmHttpClient::default(),
        })
    }
}

#[async_trait]
impl ProviderClient for AzureAnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureAnthropic
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    #[instrument(skip(self, payload))]
    async fn send_messages(&self, payload: &Value) -> Result<ProviderResponse> {
        let mut body = payload.clone();
        if let Some(obj) = body.as_object_mut() {
            if obj.get("model").and_then(Value::as_str).is_none() {
                obj.insert("model".into(), Value::String(self.default_model.clone()));
            }
            obj.remove("session_id");
            obj.remove("sessionId");
            obj.remove("max_steps");
            obj.remove("max_duration_ms");
        }

        let (status, text) = self
            .http
            .post_json(
                &self.endpoint,
                &[
                    ("x-api-key", self.api_key.clone()),
                    ("anthropic-version", self.anthropic_version.clone()),
                ],
                &body,
            )
            .await?;

        debug!(status, bytes = text.len(), "Azure Anthropic response");
        Ok(ProviderResponse::from_raw(status, text))
    }
}
