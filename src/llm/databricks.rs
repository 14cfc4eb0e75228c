// src/llm/databricks.rs
// Databricks serving-endpoint adapter

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::http_client::LlmHttpClient;
use super::provider::{ProviderClient, ProviderResponse};
use crate::config::{ProviderConfig, ProviderKind};

/// Default path template; `{model}` is replaced with the request's model.
const DEFAULT_ENDPOINT_PATH: &str = "/serving-endpoints/{model}/invocations";

/// Databricks model-serving client
pub struct DatabricksClient {
    api_base: String,
    api_key: String,
    endpoint_path: String,
    default_model: String,
    http: LlmHttpClient,
}

impl DatabricksClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_base = config
            .databricks_api_base
            .clone()
            .context("DATABRICKS_API_BASE is not set")?;
        let api_key = config
            .databricks_api_key
            .clone()
            .context("DATABRICKS_API_KEY is not set")?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            endpoint_path: config
                .databricks_endpoint_path
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT_PATH.to_string()),
            default_model: config.databricks_default_model.clone(),
            http: LlmHttpClient::default(),
        })
    }

    /// Resolve the invocation URL for a request body's model.
    fn invocation_url(&self, payload: &Value) -> String {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        format!(
            "{}{}",
            self.api_base,
            self.endpoint_path.replace("{model}", model)
        )
    }
}

#[async_trait]
impl ProviderClient for DatabricksClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Databricks
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    #[instrument(skip(self, payload), fields(url))]
    async fn send_messages(&self, payload: &Value) -> Result<ProviderResponse> {
        let url = self.invocation_url(payload);
        tracing::Span::current().record("url", url.as_str());

        // Ensure the forwarded body always names a model
        let mut body = payload.clone();
        if body.get("model").and_then(Value::as_str).is_none() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("model".into(), Value::String(self.default_model.clone()));
            }
        }
        // The serving endpoint rejects gateway-local fields
        if let Some(obj) = body.as_object_mut() {
            obj.remove("session_id");
            obj.remove("sessionId");
            obj.remove("max_steps");
            obj.remove("max_duration_ms");
        }

        let (status, text) = self
            .http
            .post_json(
                &url,
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;

        debug!(status, bytes = text.len(), "Databricks response");
        Ok(ProviderResponse::from_raw(status, text))
    }
}
