// src/tools/exec.rs
// Execution tools: shell and python_exec, delegating to the sandbox runner

use super::context::ToolContext;
use crate::llm::ToolCall;
use crate::policy::shell_command_string;
use crate::sandbox::{RunOutcome, RunSpec, SandboxMode};

/// Render a run outcome the way the model expects to read it.
pub fn format_outcome(outcome: &RunOutcome) -> String {
    let mut parts = vec![format!("Exit: {}", outcome.exit_code)];
    if outcome.timed_out {
        parts.push("(timed out)".to_string());
    }
    if !outcome.stdout.is_empty() {
        let marker = if outcome.stdout_overflow {
            " [truncated]"
        } else {
            ""
        };
        parts.push(format!("stdout{marker}:\n{}", outcome.stdout));
    }
    if !outcome.stderr.is_empty() {
        let marker = if outcome.stderr_overflow {
            " [truncated]"
        } else {
            ""
        };
        parts.push(format!("stderr{marker}:\n{}", outcome.stderr));
    }
    parts.join("\n")
}

/// Run a shell command in the workspace (sandboxed when enabled).
pub async fn shell(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let command = shell_command_string(&call);
    if command.trim().is_empty() {
        return Err("missing required argument: command".to_string());
    }

    let spec = RunSpec {
        command,
        shell: true,
        cwd: call
            .str_arg(&["cwd", "working_directory", "dir"])
            .map(Into::into),
        timeout_ms: call.u64_arg(&["timeout_ms", "timeout"]),
        sandbox: SandboxMode::Auto,
        session_id: Some(ctx.session_id.clone()),
        ..Default::default()
    };

    let outcome = ctx
        .sandbox()
        .run_process(spec)
        .await
        .map_err(|e| e.to_string())?;
    Ok(format_outcome(&outcome))
}

/// Run a snippet of python code (sandboxed when enabled).
pub async fn python_exec(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let code = call
        .str_arg(&["code", "script", "source"])
        .ok_or_else(|| "missing required argument: code".to_string())?;

    let spec = RunSpec {
        command: "python3".to_string(),
        args: vec!["-c".to_string(), code],
        timeout_ms: call.u64_arg(&["timeout_ms", "timeout"]),
        sandbox: SandboxMode::Auto,
        session_id: Some(ctx.session_id.clone()),
        ..Default::default()
    };

    let outcome = ctx
        .sandbox()
        .run_process(spec)
        .await
        .map_err(|e| e.to_string())?;
    Ok(format_outcome(&outcome))
}
