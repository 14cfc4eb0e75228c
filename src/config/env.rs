// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which upstream provider backs `/v1/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Databricks,
    AzureAnthropic,
}

impl ProviderKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "databricks" => Some(Self::Databricks),
            "azure" | "azure-anthropic" | "azure_anthropic" => Some(Self::AzureAnthropic),
            _ => None,
        }
    }
}

/// Upstream provider credentials and endpoints
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Databricks workspace base URL (DATABRICKS_API_BASE)
    pub databricks_api_base: Option<String>,
    /// Databricks PAT (DATABRICKS_API_KEY)
    pub databricks_api_key: Option<String>,
    /// Override for the serving-endpoint path segment (DATABRICKS_ENDPOINT_PATH)
    pub databricks_endpoint_path: Option<String>,
    /// Default model when the request omits one (DATABRICKS_DEFAULT_MODEL)
    pub databricks_default_model: String,
    /// Full Azure endpoint URL (AZURE_ANTHROPIC_ENDPOINT)
    pub azure_endpoint: Option<String>,
    /// Azure API key (AZURE_ANTHROPIC_API_KEY)
    pub azure_api_key: Option<String>,
    /// anthropic-version header value (AZURE_ANTHROPIC_VERSION)
    pub azure_anthropic_version: String,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let kind = read_var("MODEL_PROVIDER")
            .and_then(|s| ProviderKind::from_str(&s))
            .unwrap_or(ProviderKind::Databricks);

        Self {
            kind,
            databricks_api_base: read_var("DATABRICKS_API_BASE"),
            databricks_api_key: read_var("DATABRICKS_API_KEY"),
            databricks_endpoint_path: read_var("DATABRICKS_ENDPOINT_PATH"),
            databricks_default_model: read_var("DATABRICKS_DEFAULT_MODEL")
                .unwrap_or_else(|| "databricks-claude-sonnet-4".to_string()),
            azure_endpoint: read_var("AZURE_ANTHROPIC_ENDPOINT"),
            azure_api_key: read_var("AZURE_ANTHROPIC_API_KEY"),
            azure_anthropic_version: read_var("AZURE_ANTHROPIC_VERSION")
                .unwrap_or_else(|| "2023-06-01".to_string()),
        }
    }
}

/// Prompt cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// PROMPT_CACHE_ENABLED (default true)
    pub enabled: bool,
    /// PROMPT_CACHE_TTL_MS (default 300000)
    pub ttl_ms: u64,
    /// PROMPT_CACHE_MAX_ENTRIES (default 64)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 64,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_bool_env("PROMPT_CACHE_ENABLED").unwrap_or(defaults.enabled),
            ttl_ms: parse_num_env("PROMPT_CACHE_TTL_MS").unwrap_or(defaults.ttl_ms),
            max_entries: parse_num_env("PROMPT_CACHE_MAX_ENTRIES").unwrap_or(defaults.max_entries),
        }
    }
}

/// Git tool sub-policy (POLICY_GIT_*)
#[derive(Debug, Clone)]
pub struct GitPolicyConfig {
    pub allow_push: bool,
    pub allow_pull: bool,
    pub allow_commit: bool,
    pub require_tests: bool,
    /// Command to run before a commit is allowed (POLICY_GIT_TEST_COMMAND,
    /// falling back to WORKSPACE_TEST_COMMAND)
    pub test_command: Option<String>,
    /// Optional regex a commit message must match (POLICY_GIT_COMMIT_REGEX)
    pub commit_regex: Option<String>,
    pub autostash: bool,
}

impl Default for GitPolicyConfig {
    fn default() -> Self {
        Self {
            allow_push: false,
            allow_pull: true,
            allow_commit: true,
            require_tests: false,
            test_command: None,
            commit_regex: None,
            autostash: false,
        }
    }
}

impl GitPolicyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allow_push: parse_bool_env("POLICY_GIT_ALLOW_PUSH").unwrap_or(defaults.allow_push),
            allow_pull: parse_bool_env("POLICY_GIT_ALLOW_PULL").unwrap_or(defaults.allow_pull),
            allow_commit: parse_bool_env("POLICY_GIT_ALLOW_COMMIT")
                .unwrap_or(defaults.allow_commit),
            require_tests: parse_bool_env("POLICY_GIT_REQUIRE_TESTS")
                .unwrap_or(defaults.require_tests),
            test_command: read_var("POLICY_GIT_TEST_COMMAND")
                .or_else(|| read_var("WORKSPACE_TEST_COMMAND")),
            commit_regex: read_var("POLICY_GIT_COMMIT_REGEX"),
            autostash: parse_bool_env("POLICY_GIT_AUTOSTASH").unwrap_or(defaults.autostash),
        }
    }
}

/// Agent-loop and tool-call policy (POLICY_*)
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Maximum provider round-trips per request (POLICY_MAX_STEPS)
    pub max_steps: usize,
    /// Maximum executed tool calls per request (POLICY_MAX_TOOL_CALLS)
    pub max_tool_calls: usize,
    /// Comma-separated canonical tool names that are never executed
    /// (POLICY_DISALLOWED_TOOLS)
    pub disallowed_tools: Vec<String>,
    pub git: GitPolicyConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_tool_calls: 12,
            disallowed_tools: Vec::new(),
            git: GitPolicyConfig::default(),
        }
    }
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_steps: parse_num_env("POLICY_MAX_STEPS").unwrap_or(defaults.max_steps),
            max_tool_calls: parse_num_env("POLICY_MAX_TOOL_CALLS")
                .unwrap_or(defaults.max_tool_calls),
            disallowed_tools: read_var("POLICY_DISALLOWED_TOOLS")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            git: GitPolicyConfig::from_env(),
        }
    }
}

/// MCP manifest discovery (MCP_SERVER_MANIFEST, MCP_MANIFEST_DIRS)
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Single manifest file, highest precedence
    pub manifest_file: Option<PathBuf>,
    /// Directories scanned for `*.json` manifests
    pub manifest_dirs: Vec<PathBuf>,
}

impl McpConfig {
    pub fn from_env() -> Self {
        let manifest_file = read_var("MCP_SERVER_MANIFEST").map(|p| expand_home(&p));
        let manifest_dirs = read_var("MCP_MANIFEST_DIRS")
            .map(|s| split_list(&s).iter().map(|p| expand_home(p)).collect())
            .unwrap_or_else(|| vec![expand_home("~/.claude/mcp")]);
        Self {
            manifest_file,
            manifest_dirs,
        }
    }
}

/// Sandbox permission mode for tool execution (MCP_SANDBOX_PERMISSION_MODE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxPermissionMode {
    /// Admit by default, log allowlist misses
    #[default]
    Auto,
    /// Reject anything not matching the allow list
    Require,
    /// Reject everything
    Deny,
}

impl SandboxPermissionMode {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "require" => Some(Self::Require),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// Containerized execution settings (MCP_SANDBOX_*)
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub enabled: bool,
    /// Container image (MCP_SANDBOX_IMAGE)
    pub image: String,
    /// Container runtime binary (MCP_SANDBOX_RUNTIME)
    pub runtime: String,
    /// Workspace mount point inside the container (MCP_SANDBOX_CONTAINER_WORKSPACE)
    pub container_workspace: String,
    pub mount_workspace: bool,
    pub allow_networking: bool,
    /// Docker network mode when networking is allowed (MCP_SANDBOX_NETWORK_MODE)
    pub network_mode: String,
    /// Host env var names forwarded into the container (MCP_SANDBOX_PASSTHROUGH_ENV)
    pub passthrough_env: Vec<String>,
    /// Extra binds, `host:container[:mode]` (MCP_SANDBOX_EXTRA_MOUNTS)
    pub extra_mounts: Vec<String>,
    /// Default run timeout (MCP_SANDBOX_TIMEOUT_MS)
    pub timeout_ms: u64,
    pub user: Option<String>,
    pub entrypoint: Option<String>,
    pub reuse_session: bool,
    pub permission_mode: SandboxPermissionMode,
    /// Command patterns (single trailing `*` wildcard) explicitly allowed
    pub permission_allow: Vec<String>,
    /// Command patterns explicitly denied
    pub permission_deny: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image: "python:3.12-slim".to_string(),
            runtime: "docker".to_string(),
            container_workspace: "/workspace".to_string(),
            mount_workspace: true,
            allow_networking: false,
            network_mode: "none".to_string(),
            passthrough_env: Vec::new(),
            extra_mounts: Vec::new(),
            timeout_ms: 15_000,
            user: None,
            entrypoint: None,
            reuse_session: false,
            permission_mode: SandboxPermissionMode::Auto,
            permission_allow: Vec::new(),
            permission_deny: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_bool_env("MCP_SANDBOX_ENABLED").unwrap_or(defaults.enabled),
            image: read_var("MCP_SANDBOX_IMAGE").unwrap_or(defaults.image),
            runtime: read_var("MCP_SANDBOX_RUNTIME").unwrap_or(defaults.runtime),
            container_workspace: read_var("MCP_SANDBOX_CONTAINER_WORKSPACE")
                .unwrap_or(defaults.container_workspace),
            mount_workspace: parse_bool_env("MCP_SANDBOX_MOUNT_WORKSPACE")
                .unwrap_or(defaults.mount_workspace),
            allow_networking: parse_bool_env("MCP_SANDBOX_ALLOW_NETWORKING")
                .unwrap_or(defaults.allow_networking),
            network_mode: read_var("MCP_SANDBOX_NETWORK_MODE").unwrap_or(defaults.network_mode),
            passthrough_env: read_var("MCP_SANDBOX_PASSTHROUGH_ENV")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            extra_mounts: read_var("MCP_SANDBOX_EXTRA_MOUNTS")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            timeout_ms: parse_num_env("MCP_SANDBOX_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
            user: read_var("MCP_SANDBOX_USER"),
            entrypoint: read_var("MCP_SANDBOX_ENTRYPOINT"),
            reuse_session: parse_bool_env("MCP_SANDBOX_REUSE_SESSION")
                .unwrap_or(defaults.reuse_session),
            permission_mode: read_var("MCP_SANDBOX_PERMISSION_MODE")
                .and_then(|s| SandboxPermissionMode::from_str(&s))
                .unwrap_or_default(),
            permission_allow: read_var("MCP_SANDBOX_PERMISSION_ALLOW")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            permission_deny: read_var("MCP_SANDBOX_PERMISSION_DENY")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
        }
    }
}

/// External web search endpoint (WEB_SEARCH_*)
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub endpoint: String,
    pub allow_all_hosts: bool,
    pub allowed_hosts: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8888/search".to_string(),
            allow_all_hosts: true,
            allowed_hosts: Vec::new(),
            timeout_ms: 10_000,
        }
    }
}

impl WebSearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: read_var("WEB_SEARCH_ENDPOINT").unwrap_or(defaults.endpoint),
            allow_all_hosts: parse_bool_env("WEB_SEARCH_ALLOW_ALL")
                .unwrap_or(defaults.allow_all_hosts),
            allowed_hosts: read_var("WEB_SEARCH_ALLOWED_HOSTS")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            timeout_ms: parse_num_env("WEB_SEARCH_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
        }
    }
}

/// HTTP server and workspace settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PORT (default 8080)
    pub port: u16,
    /// WORKSPACE_ROOT (default: current directory)
    pub workspace_root: PathBuf,
    /// SESSION_DB_PATH (default data/sessions.db)
    pub session_db_path: PathBuf,
    /// WORKSPACE_TEST_COMMAND, used by the test-run tool
    pub test_command: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let workspace_root = read_var("WORKSPACE_ROOT")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            port: parse_num_env("PORT").unwrap_or(8080),
            workspace_root,
            session_db_path: read_var("SESSION_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/sessions.db")),
            test_command: read_var("WORKSPACE_TEST_COMMAND"),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }
        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }
        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub policy: PolicyConfig,
    pub mcp: McpConfig,
    pub sandbox: SandboxConfig,
    pub web_search: WebSearchConfig,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");
        let config = Self {
            server: ServerConfig::from_env(),
            provider: ProviderConfig::from_env(),
            cache: CacheConfig::from_env(),
            policy: PolicyConfig::from_env(),
            mcp: McpConfig::from_env(),
            sandbox: SandboxConfig::from_env(),
            web_search: WebSearchConfig::from_env(),
        };
        debug!(
            provider = ?config.provider.kind,
            port = config.server.port,
            workspace = %config.server.workspace_root.display(),
            "Configuration loaded"
        );
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::default();

        match self.provider.kind {
            ProviderKind::Databricks => {
                if self.provider.databricks_api_base.is_none() {
                    validation.add_error("DATABRICKS_API_BASE is required for the databricks provider");
                }
                if self.provider.databricks_api_key.is_none() {
                    validation.add_error("DATABRICKS_API_KEY is required for the databricks provider");
                }
            }
            ProviderKind::AzureAnthropic => {
                if self.provider.azure_endpoint.is_none() {
                    validation.add_error("AZURE_ANTHROPIC_ENDPOINT is required for the azure provider");
                }
                if self.provider.azure_api_key.is_none() {
                    validation.add_error("AZURE_ANTHROPIC_API_KEY is required for the azure provider");
                }
            }
        }

        if !self.server.workspace_root.exists() {
            validation.add_warning(format!(
                "WORKSPACE_ROOT does not exist: {}",
                self.server.workspace_root.display()
            ));
        }

        if self.policy.max_steps == 0 {
            validation.add_error("POLICY_MAX_STEPS must be at least 1");
        }

        if self.sandbox.enabled && self.sandbox.image.trim().is_empty() {
            validation.add_error("MCP_SANDBOX_IMAGE must not be empty when the sandbox is enabled");
        }

        if let Some(ref pattern) = self.policy.git.commit_regex {
            if regex::Regex::new(pattern).is_err() {
                validation.add_error(format!("POLICY_GIT_COMMIT_REGEX is not a valid regex: {pattern}"));
            }
        }

        validation
    }
}

/// Read a single env var, filtering empty values
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(var = name, value = %value, "Unparseable boolean env var, using default");
            None
        }
    }
}

fn parse_num_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Split a comma-separated list, trimming and dropping empties
fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Resolve a leading `~/` against the invoking user's home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list(" , ,"), Vec::<String>::new());
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(ProviderKind::from_str("databricks"), Some(ProviderKind::Databricks));
        assert_eq!(ProviderKind::from_str("Azure"), Some(ProviderKind::AzureAnthropic));
        assert_eq!(ProviderKind::from_str("azure_anthropic"), Some(ProviderKind::AzureAnthropic));
        assert_eq!(ProviderKind::from_str("openai"), None);
    }

    #[test]
    fn test_permission_mode_from_str() {
        assert_eq!(
            SandboxPermissionMode::from_str("require"),
            Some(SandboxPermissionMode::Require)
        );
        assert_eq!(
            SandboxPermissionMode::from_str("DENY"),
            Some(SandboxPermissionMode::Deny)
        );
        assert_eq!(SandboxPermissionMode::from_str("bogus"), None);
    }

    #[test]
    fn test_cache_defaults() {
        let cache = CacheConfig::default();
        assert!(cache.enabled);
        assert_eq!(cache.ttl_ms, 300_000);
        assert_eq!(cache.max_entries, 64);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.max_steps, 8);
        assert_eq!(policy.max_tool_calls, 12);
        assert!(policy.disallowed_tools.is_empty());
        assert!(!policy.git.allow_push);
        assert!(policy.git.allow_pull);
        assert!(policy.git.allow_commit);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/manifests");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_validation_report_ok() {
        let validation = ConfigValidation::default();
        assert!(validation.is_valid());
        assert_eq!(validation.report(), "Configuration OK");
    }

    #[test]
    fn test_validation_report_with_errors() {
        let mut validation = ConfigValidation::default();
        validation.add_error("missing key");
        validation.add_warning("odd setting");
        assert!(!validation.is_valid());
        let report = validation.report();
        assert!(report.contains("missing key"));
        assert!(report.contains("odd setting"));
    }
}
