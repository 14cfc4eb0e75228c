// src/tools/tasks.rs
// Task tools over the tasks table

use serde_json::json;

use super::context::ToolContext;
use crate::db::tasks;
use crate::llm::ToolCall;

fn required_id(call: &ToolCall) -> Result<i64, String> {
    call.i64_arg(&["id", "task_id"])
        .ok_or_else(|| "missing required argument: id".to_string())
}

pub async fn task_create(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let title = call
        .str_arg(&["title", "name"])
        .ok_or_else(|| "missing required argument: title".to_string())?;
    let description = call.str_arg(&["description", "details", "body"]);
    let priority = call
        .str_arg(&["priority"])
        .unwrap_or_else(|| "medium".to_string());

    let id = ctx
        .pool()
        .run(move |conn| tasks::create_task_sync(conn, &title, description.as_deref(), &priority))
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({"id": id, "status": "pending"}).to_string())
}

pub async fn task_get(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let id = required_id(&call)?;
    let task = ctx
        .pool()
        .run(move |conn| tasks::get_task_sync(conn, id))
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("task {id} not found"))?;
    serde_json::to_string(&task).map_err(|e| e.to_string())
}

pub async fn task_update(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let id = required_id(&call)?;
    let title = call.str_arg(&["title", "name"]);
    let description = call.str_arg(&["description", "details", "body"]);
    let priority = call.str_arg(&["priority"]);

    let updated = ctx
        .pool()
        .run(move |conn| {
            tasks::update_task_sync(
                conn,
                id,
                title.as_deref(),
                description.as_deref(),
                priority.as_deref(),
            )
        })
        .await
        .map_err(|e| e.to_string())?;
    if updated {
        Ok(format!("task {id} updated"))
    } else {
        Err(format!("task {id} not found"))
    }
}

pub async fn task_set_status(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let id = required_id(&call)?;
    let status = call
        .str_arg(&["status", "state"])
        .ok_or_else(|| "missing required argument: status".to_string())?;

    let updated = ctx
        .pool()
        .run(move |conn| tasks::set_task_status_sync(conn, id, &status))
        .await
        .map_err(|e| e.to_string())?;
    if updated {
        Ok(format!("task {id} status updated"))
    } else {
        Err(format!("task {id} not found"))
    }
}

pub async fn task_delete(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let id = required_id(&call)?;
    let deleted = ctx
        .pool()
        .run(move |conn| tasks::delete_task_sync(conn, id))
        .await
        .map_err(|e| e.to_string())?;
    if deleted {
        Ok(format!("task {id} deleted"))
    } else {
        Err(format!("task {id} not found"))
    }
}

pub async fn tasks_list(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let status = call.str_arg(&["status", "state"]);
    let limit = call
        .u64_arg(&["limit", "max"])
        .map(|n| n as usize)
        .unwrap_or(50);

    let list = ctx
        .pool()
        .run(move |conn| tasks::list_tasks_sync(conn, status.as_deref(), limit))
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_string(&list).map_err(|e| e.to_string())
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
    async fn test_task_crud_via_tools() {
        let (ctx, _dir) = test_context().await;

        let created = task_create(
            call("workspace_task_create", json!({"title": "ship it", "priority": "high"})),
            ctx.clone(),
        )
        .await
        .expect("create");
        let created: Value = serde_json::from_str(&created).expect("json");
        let id = created["id"].as_i64().expect("id");

        let fetched = task_get(call("workspace_task_get", json!({"id": id})), ctx.clone())
            .await
            .expect("get");
        assert!(fetched.contains("ship it"));

        task_set_status(
            call("workspace_task_set_status", json!({"id": id, "status": "completed"})),
            ctx.clone(),
        )
        .await
        .expect("status");

        let listing = tasks_list(
            call("workspace_tasks_list", json!({"status": "completed"})),
            ctx.clone(),
        )
        .await
        .expect("list");
        assert!(listing.contains("ship it"));

        task_delete(call("workspace_task_delete", json!({"id": id})), ctx.clone())
            .await
            .expect("delete");
        assert!(
            task_get(call("workspace_task_get", json!({"id": id})), ctx)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_missing_title_rejected() {
        let (ctx, _dir) = test_context().await;
        assert!(
            task_create(call("workspace_task_create", json!({})), ctx)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_invalid_status_surfaces_error() {
        let (ctx, _dir) = test_context().await;
        let created = task_create(
            call("workspace_task_create", json!({"title": "t"})),
            ctx.clone(),
        )
        .await
        .expect("create");
        let id = serde_json::from_str::<Value>(&created).expect("json")["id"]
            .as_i64()
            .expect("id");

        assert!(
            task_set_status(
                call("workspace_task_set_status", json!({"id": id, "status": "bogus"})),
                ctx,
            )
            .await
            .is_err()
        );
    }
}
