// src/tools/edits.rs
// Edit-history tools: inspect and revert recorded workspace writes

use serde_json::json;

use super::context::ToolContext;
use super::workspace::resolve_workspace_path;
use crate::db::edits;
use crate::llm::ToolCall;

/// List recorded edits, optionally filtered by path.
pub async fn edit_history(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let path = call.str_arg(&["path", "file", "file_path"]);
    let limit = call
        .u64_arg(&["limit", "max"])
        .map(|n| n as usize)
        .unwrap_or(20);

    let list = ctx
        .pool()
        .run(move |conn| edits::list_edits_sync(conn, path.as_deref(), limit))
        .await
        .map_err(|e| e.to_string())?;

    let entries: Vec<_> = list
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "path": e.path,
                "operation": e.operation,
                "created_at": e.created_at,
                "diff": e.diff,
            })
        })
        .collect();
    serde_json::to_string(&entries).map_err(|e| e.to_string())
}

/// Restore a file to its before-snapshot for a recorded edit.
pub async fn edit_revert(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let id = call
        .i64_arg(&["id", "edit_id"])
        .ok_or_else(|| "missing required argument: id".to_string())?;

    let edit = ctx
        .pool()
        .run(move |conn| edits::get_edit_sync(conn, id))
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("edit {id} not found"))?;

    let before = edit
        .before_content
        .ok_or_else(|| format!("edit {id} has no before-snapshot (file was created)"))?;

    let resolved = resolve_workspace_path(ctx.workspace_root(), &edit.path)?;
    let current = tokio::fs::read_to_string(&resolved).await.ok();
    tokio::fs::write(&resolved, &before)
        .await
        .map_err(|e| format!("cannot restore {}: {e}", edit.path))?;

    // The revert itself is recorded so it can be reverted too
    let session_id = ctx.session_id.clone();
    let path = edit.path.clone();
    ctx.pool()
        .try_interact("record revert", move |conn| {
            edits::record_edit_sync(
                conn,
                Some(&session_id),
                &path,
                "revert",
                current.as_deref(),
                Some(&before),
                None,
            )
            .map_err(Into::into)
        })
        .await;

    Ok(format!("reverted {} to the state before edit {id}", edit.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::test_support::test_context;
    use crate::tools::workspace::fs_write;
    use serde_json::Value;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new(Some("c".into()), name, &args, Value::Null)
    }

    #[tokio::test]
    async fn test_history_and_revert() {
        let (ctx, _dir) = test_context().await;

        fs_write(
            call("fs_write", json!({"path": "f.txt", "content": "v1\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");
        fs_write(
            call("fs_write", json!({"path": "f.txt", "content": "v2\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");

        let history = edit_history(
            call("workspace_edit_history", json!({"path": "f.txt"})),
            ctx.clone(),
        )
        .await
        .expect("history");
        let entries: Vec<Value> = serde_json::from_str(&history).expect("json");
        assert_eq!(entries.len(), 2);
        let latest_id = entries[0]["id"].as_i64().expect("id");

        edit_revert(
            call("workspace_edit_revert", json!({"id": latest_id})),
            ctx.clone(),
        )
        .await
        .expect("revert");

        let content =
            std::fs::read_to_string(ctx.workspace_root().join("f.txt")).expect("read");
        assert_eq!(content, "v1\n");
    }

    #[tokio::test]
    async fn test_revert_creation_edit_fails() {
        let (ctx, _dir) = test_context().await;
        fs_write(
            call("fs_write", json!({"path": "new.txt", "content": "x"})),
            ctx.clone(),
        )
        .await
        .expect("write");

        let history = edit_history(call("workspace_edit_history", json!({})), ctx.clone())
            .await
            .expect("history");
        let entries: Vec<Value> = serde_json::from_str(&history).expect("json");
        let id = entries[0]["id"].as_i64().expect("id");

        // No before-snapshot exists for a brand-new file
        assert!(
            edit_revert(call("workspace_edit_revert", json!({"id": id})), ctx)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_revert_unknown_id() {
        let (ctx, _dir) = test_context().await;
        assert!(
            edit_revert(call("workspace_edit_revert", json!({"id": 999})), ctx)
                .await
                .is_err()
        );
    }
}
