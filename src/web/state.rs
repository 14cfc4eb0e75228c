// src/web/state.rs
// Shared application state for the HTTP surface

use anyhow::Result;
use std::sync::Arc;

use crate::agent::Orchestrator;
use crate::cache::PromptCache;
use crate::config::EnvConfig;
use crate::db::{DatabasePool, SessionStore};
use crate::llm::{ProviderClient, create_provider};
use crate::mcp::McpRegistry;
use crate::metrics::Metrics;
use crate::policy::PolicyEngine;
use crate::sandbox::SandboxRunner;
use crate::tools::{Services, ToolRegistry, WebClient, register_builtin_tools};

/// Process-wide state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ToolRegistry>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire up every subsystem from the environment configuration.
    pub async fn initialize(config: EnvConfig) -> Result<Self> {
        let provider = create_provider(&config)?;
        Self::with_provider(config, provider).await
    }

    /// Wire up the state around an explicit provider (tests inject a
    /// scripted one here).
    pub async fn with_provider(
        config: EnvConfig,
        provider: Arc<dyn ProviderClient>,
    ) -> Result<Self> {
        let pool = Arc::new(DatabasePool::open(&config.server.session_db_path).await?);
        Self::assemble(config, provider, pool).await
    }

    /// Like `with_provider` but on an in-memory database (tests).
    pub async fn with_provider_in_memory(
        config: EnvConfig,
        provider: Arc<dyn ProviderClient>,
    ) -> Result<Self> {
        let pool = Arc::new(DatabasePool::open_in_memory().await?);
        Self::assemble(config, provider, pool).await
    }

    async fn assemble(
        config: EnvConfig,
        provider: Arc<dyn ProviderClient>,
        pool: Arc<DatabasePool>,
    ) -> Result<Self> {
        let store = SessionStore::new(pool.clone());
        let sandbox = Arc::new(SandboxRunner::new(
            config.sandbox.clone(),
            config.server.workspace_root.clone(),
        ));
        let mcp = Arc::new(McpRegistry::new(config.mcp.clone()));
        mcp.refresh().await;
        let web = Arc::new(WebClient::new(config.web_search.clone()));

        let cache = Arc::new(PromptCache::new(&config.cache));
        let policy = Arc::new(PolicyEngine::new(
            config.policy.clone(),
            config.sandbox.clone(),
        ));
        let config = Arc::new(config);

        let services = Arc::new(Services {
            config: config.clone(),
            pool,
            store,
            sandbox,
            mcp: mcp.clone(),
            web,
        });

        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry);
        // Remote MCP tools become local proxies named mcp_<server>_<tool>
        crate::tools::mcp::register_remote_tools(&registry, &mcp).await;

        let metrics = Arc::new(Metrics::new());
        let orchestrator = Arc::new(Orchestrator::new(
            provider,
            cache,
            registry.clone(),
            policy,
            services.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            services,
            orchestrator,
            registry,
            metrics,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.services.store
    }

    /// Close MCP children before exit.
    pub async fn shutdown(&self) {
        self.services.mcp.shutdown_all().await;
    }
}
