// src/sandbox/runner.rs
// Subprocess runner with bounded output, timeouts, and optional container
// isolation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::sessions::{SandboxSession, SessionTracker};
use crate::config::SandboxConfig;
use crate::error::{GatehouseError, Result};

/// Default per-stream output cap (1 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;
/// Default timeout (15 s); clamped to [1 ms, 15 min].
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const MAX_TIMEOUT_MS: u64 = 15 * 60 * 1000;

/// Whether a run goes through the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxMode {
    Always,
    Never,
    #[default]
    Auto,
}

/// One subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Working directory; must resolve inside the workspace root
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Text written to the child's stdin
    pub input: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_buffer: Option<usize>,
    /// Run through `sh -c` instead of exec-ing the binary directly
    pub shell: bool,
    pub sandbox: SandboxMode,
    pub session_id: Option<String>,
}

/// What came back from a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_overflow: bool,
    pub stderr_overflow: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Launches subprocesses, directly or inside the configured container
/// runtime, and tracks sandbox sessions.
pub struct SandboxRunner {
    config: SandboxConfig,
    workspace_root: PathBuf,
    sessions: SessionTracker,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig, workspace_root: PathBuf) -> Self {
        Self {
            config,
            workspace_root,
            sessions: SessionTracker::new(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn sandbox_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn list_sessions(&self) -> Vec<SandboxSession> {
        self.sessions.list()
    }

    pub fn release_session(&self, session_id: &str) -> bool {
        self.sessions.release(session_id)
    }

    /// Run a subprocess according to the spec.
    pub async fn run_process(&self, spec: RunSpec) -> Result<RunOutcome> {
        let cwd = self.resolve_cwd(spec.cwd.as_deref())?;
        let sandboxed = match spec.sandbox {
            SandboxMode::Never => false,
            SandboxMode::Always => {
                if !self.config.enabled {
                    return Err(GatehouseError::Sandbox(
                        "sandboxed execution requested but the sandbox is disabled".into(),
                    ));
                }
                true
            }
            SandboxMode::Auto => self.config.enabled,
        };

        let timeout_ms = spec
            .timeout_ms
            .unwrap_or(if sandboxed {
                self.config.timeout_ms
            } else {
                DEFAULT_TIMEOUT_MS
            })
            .clamp(1, MAX_TIMEOUT_MS);
        let max_buffer = spec.max_buffer.unwrap_or(DEFAULT_MAX_BUFFER);

        let mut command = if sandboxed {
            self.container_command(&spec, &cwd)
        } else {
            self.direct_command(&spec, &cwd)
        };

        if let Some(ref session_id) = spec.session_id {
            self.sessions.touch(session_id);
        }

        debug!(
            command = %spec.command,
            sandboxed,
            timeout_ms,
            cwd = %cwd.display(),
            "Launching subprocess"
        );

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            GatehouseError::Sandbox(format!("failed to spawn '{}': {e}", spec.command))
        })?;

        if let Some(input) = spec.input {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %e, "Failed to write subprocess stdin");
                }
                // Dropping stdin closes the pipe so the child sees EOF
            }
        } else {
            drop(child.stdin.take());
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task =
            tokio::spawn(async move { read_capped(stdout, max_buffer).await });
        let stderr_task =
            tokio::spawn(async move { read_capped(stderr, max_buffer).await });

        let (status, timed_out) =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
                Ok(Ok(status)) => (Some(status), false),
                Ok(Err(e)) => {
                    warn!(error = %e, "Subprocess wait failed");
                    (None, false)
                }
                Err(_) => {
                    // SIGKILL on timeout; readers unblock on pipe close
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "Failed to kill timed-out subprocess");
                    }
                    let _ = child.wait().await;
                    (None, true)
                }
            };

        let (stdout, stdout_overflow) = stdout_task.await.unwrap_or_default();
        let (stderr, stderr_overflow) = stderr_task.await.unwrap_or_default();

        let (exit_code, signal) = match status {
            Some(status) => (status.code().unwrap_or(-1), unix_signal(&status)),
            None if timed_out => (-1, Some(9)),
            None => (-1, None),
        };

        Ok(RunOutcome {
            exit_code,
            signal,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_overflow,
            stderr_overflow,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Resolve and confine the working directory to the workspace root.
    fn resolve_cwd(&self, cwd: Option<&Path>) -> Result<PathBuf> {
        let requested = match cwd {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.workspace_root.join(path),
            None => return Ok(self.workspace_root.clone()),
        };
        let canonical = requested
            .canonicalize()
            .map_err(|e| GatehouseError::Sandbox(format!("invalid working directory: {e}")))?;
        let root = self
            .workspace_root
            .canonicalize()
            .unwrap_or_else(|_| self.workspace_root.clone());
        if !canonical.starts_with(&root) {
            return Err(GatehouseError::Sandbox(format!(
                "working directory escapes the workspace root: {}",
                canonical.display()
            )));
        }
        Ok(canonical)
    }

    fn direct_command(&self, spec: &RunSpec, cwd: &Path) -> Command {
        let mut command = if spec.shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&spec.command);
            c
        } else {
            let mut c = Command::new(&spec.command);
            c.args(&spec.args);
            c
        };
        command.current_dir(cwd);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(ref session_id) = spec.session_id {
            command.env("MCP_SANDBOX_SESSION", session_id);
        }
        command
    }

    /// Build the `docker run --rm ...` (or configured runtime) invocation.
    fn container_command(&self, spec: &RunSpec, cwd: &Path) -> Command {
        let mut command = Command::new(&self.config.runtime);
        command.arg("run").arg("--rm").arg("-i");

        let network = if self.config.allow_networking {
            self.config.network_mode.as_str()
        } else {
            "none"
        };
        command.arg("--network").arg(network);

        if self.config.mount_workspace {
            command.arg("-v").arg(format!(
                "{}:{}",
                self.workspace_root.display(),
                self.config.container_workspace
            ));
            // Map the host cwd to the same relative location in the container
            let workdir = cwd
                .strip_prefix(&self.workspace_root)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map(|rel| format!("{}/{}", self.config.container_workspace, rel.display()))
                .unwrap_or_else(|| self.config.container_workspace.clone());
            command.arg("-w").arg(workdir);
        }

        for mount in &self.config.extra_mounts {
            command.arg("-v").arg(mount);
        }

        for name in &self.config.passthrough_env {
            if let Ok(value) = std::env::var(name) {
                command.arg("-e").arg(format!("{name}={value}"));
            }
        }
        for (key, value) in &spec.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        if let Some(ref session_id) = spec.session_id {
            command.arg("-e").arg(format!("MCP_SANDBOX_SESSION={session_id}"));
        }

        if let Some(ref user) = self.config.user {
            command.arg("-u").arg(user);
        }
        if let Some(ref entrypoint) = self.config.entrypoint {
            command.arg("--entrypoint").arg(entrypoint);
        }

        command.arg(&self.config.image);
        if spec.shell {
            command.arg("sh").arg("-c").arg(&spec.command);
        } else {
            command.arg(&spec.command);
            command.args(&spec.args);
        }
        command
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes and flagging overflow.
/// The stream is always drained so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = match reader {
        Some(r) => r,
        None => return (Vec::new(), false),
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut overflow = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = (cap - buf.len()).min(n);
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        overflow = true;
                    }
                } else {
                    overflow = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, overflow)
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
