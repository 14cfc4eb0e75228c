// src/config/mod.rs
// Configuration layer - environment variables are the single source of truth

pub mod env;

pub use env::{
    CacheConfig, EnvConfig, GitPolicyConfig, McpConfig, PolicyConfig, ProviderConfig,
    ProviderKind, SandboxConfig, SandboxPermissionMode, ServerConfig, WebSearchConfig,
};
