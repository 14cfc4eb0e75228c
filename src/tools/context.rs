// src/tools/context.rs
// Execution context handed to every tool handler

use std::path::Path;
use std::sync::Arc;

use crate::config::EnvConfig;
use crate::db::{DatabasePool, SessionStore};
use crate::mcp::McpRegistry;
use crate::sandbox::SandboxRunner;
use crate::tools::web::WebClient;

/// Long-lived subsystem handles shared by all tool executions.
pub struct Services {
    pub config: Arc<EnvConfig>,
    pub pool: Arc<DatabasePool>,
    pub store: SessionStore,
    pub sandbox: Arc<SandboxRunner>,
    pub mcp: Arc<McpRegistry>,
    pub web: Arc<WebClient>,
}

/// Per-call context: the bound session plus the shared services.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub services: Arc<Services>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, services: Arc<Services>) -> Self {
        Self {
            session_id: session_id.into(),
            services,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.services.config.server.workspace_root
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.services.pool
    }

    pub fn store(&self) -> &SessionStore {
        &self.services.store
    }

    pub fn sandbox(&self) -> &Arc<SandboxRunner> {
        &self.services.sandbox
    }

    pub fn mcp(&self) -> &Arc<McpRegistry> {
        &self.services.mcp
    }

    pub fn web(&self) -> &Arc<WebClient> {
        &self.services.web
    }

    pub fn config(&self) -> &Arc<EnvConfig> {
        &self.services.config
    }
}
