// src/llm/mod.rs
// Upstream provider adapters and wire-shape handling

pub mod azure;
pub mod databricks;
pub mod http_client;
pub mod provider;
pub mod types;

pub use provider::{ProviderClient, ProviderResponse, create_provider};
pub use types::{
    MessageShape, ParsedAssistant, ToolCall, normalize_arguments, parse_assistant,
    synthesize_assistant_message,
};
