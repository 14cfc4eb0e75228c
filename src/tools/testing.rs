// src/tools/testing.rs
// Test tools: run the configured test command and keep a run history

use serde_json::json;

use super::context::ToolContext;
use super::exec::format_outcome;
use crate::db::test_runs;
use crate::llm::ToolCall;
use crate::sandbox::{RunSpec, SandboxMode};

/// Keep at most this much output in the run record.
const SNIPPET_BYTES: usize = 4096;

/// Run the workspace test command (or an explicit override) and record it.
pub async fn test_run(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let command = call
        .str_arg(&["command", "cmd"])
        .or_else(|| ctx.config().server.test_command.clone())
        .ok_or_else(|| {
            "no test command: pass one or set WORKSPACE_TEST_COMMAND".to_string()
        })?;

    let spec = RunSpec {
        command: command.clone(),
        shell: true,
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

    let mut snippet = format!("{}\n{}", outcome.stdout, outcome.stderr);
    snippet.truncate(SNIPPET_BYTES);
    let session_id = ctx.session_id.clone();
    let exit_code = outcome.exit_code as i64;
    let duration_ms = outcome.duration_ms as i64;
    let recorded_command = command.clone();
    ctx.pool()
        .try_interact("record test run", move |conn| {
            test_runs::record_test_run_sync(
                conn,
                Some(&session_id),
                &recorded_command,
                exit_code,
                Some(snippet.trim()),
                duration_ms,
            )
            .map_err(Into::into)
        })
        .await;

    Ok(format_outcome(&outcome))
}

/// Recent recorded test runs.
pub async fn test_history(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let limit = call
        .u64_arg(&["limit", "max"])
        .map(|n| n as usize)
        .unwrap_or(10);
    let runs = ctx
        .pool()
        .run(move |conn| test_runs::list_test_runs_sync(conn, limit))
        .await
        .map_err(|e| e.to_string())?;

    let entries: Vec<_> = runs
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "command": r.command,
                "exit_code": r.exit_code,
                "passed": r.passed,
                "duration_ms": r.duration_ms,
                "created_at": r.created_at,
            })
        })
        .collect();
    serde_json::to_string(&entries).map_err(|e| e.to_string())
}

/// Aggregate pass/fail summary plus the latest run.
pub async fn test_summary(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let (passed, failed, latest) = ctx
        .pool()
        .run(|conn| test_runs::test_summary_sync(conn))
        .await
        .map_err(|e| e.to_string())?;

    let latest = latest.map(|r| {
        json!({
            "command": r.command,
            "passed": r.passed,
            "exit_code": r.exit_code,
            "created_at": r.created_at,
        })
    });
    Ok(json!({"passed": passed, "failed": failed, "latest": latest}).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::test_support::test_context;
    use serde_json::Value;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new(Some("c".into()), name, &args, Value::Null)
    }

    #[tokio::test]
    async fn test_run_records_history() {
        let (ctx, _dir) = test_context().await;

        let passing = test_run(
            call("workspace_test_run", json!({"command": "echo all tests passed"})),
            ctx.clone(),
        )
        .await
        .expect("run");
        assert!(passing.contains("all tests passed"));

        test_run(
            call("workspace_test_run", json!({"command": "exit 1"})),
            ctx.clone(),
        )
        .await
        .expect("run");

        let history = test_history(call("workspace_test_history", json!({})), ctx.clone())
            .await
            .expect("history");
        let entries: Vec<Value> = serde_json::from_str(&history).expect("json");
        assert_eq!(entries.len(), 2);

        let summary = test_summary(call("workspace_test_summary", json!({})), ctx)
            .await
            .expect("summary");
        let summary: Value = serde_json::from_str(&summary).expect("json");
        assert_eq!(summary["passed"], 1);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["latest"]["passed"], false);
    }

    #[tokio::test]
    async fn test_run_without_command_configured() {
        let (ctx, _dir) = test_context().await;
        assert!(
            test_run(call("workspace_test_run", json!({})), ctx)
                .await
                .is_err()
        );
    }
}
