// src/web/messages.rs
// POST /v1/messages: the agent-loop entry point, unary or SSE

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::api::resolve_session_id;
use super::state::AppState;
use crate::agent::ProcessOutcome;

/// POST /v1/messages
pub async fn post_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    state.metrics.record_request();

    let (session_id, generated) = resolve_session_id(&headers, &payload);
    debug!(session_id = %session_id, generated, "Bound message request to session");
    if generated {
        // Mark the session as server-named before the loop touches it
        if let Err(e) = state.store().get_or_create_session(&session_id, true).await {
            warn!(error = %e, "Failed to pre-create generated session");
        }
    }

    let stream = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if stream {
        state.metrics.record_streaming_session();
        stream_response(state, payload, session_id).await
    } else {
        let outcome = state.orchestrator.process_message(payload, &session_id).await;
        unary_response(outcome)
    }
}

fn unary_response(outcome: ProcessOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(outcome.body)).into_response();
    for (name, value) in &outcome.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// SSE: one `message` event with the full final body, then one `end` event
/// carrying the termination reason.
async fn stream_response(state: AppState, payload: Value, session_id: String) -> Response {
    let (tx, rx) = mpsc::channel::<String>(4);

    tokio::spawn(async move {
        let outcome = state.orchestrator.process_message(payload, &session_id).await;

        let message_event = format!(
            "event: message\ndata: {}\n\n",
            json!({"type": "message", "message": outcome.body})
        );
        let end_event = format!(
            "event: end\ndata: {}\n\n",
            json!({"termination": outcome.termination.as_str()})
        );
        // A closed receiver means the client went away; nothing to finalize
        // here because the orchestrator already persisted its turns.
        let _ = tx.send(message_event).await;
        let _ = tx.send(end_event).await;
    });

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CacheConfig, EnvConfig, McpConfig, PolicyConfig, ProviderConfig, ProviderKind,
        SandboxConfig, ServerConfig, WebSearchConfig,
    };
    use crate::llm::{ProviderClient, ProviderResponse};
    use crate::web::create_router;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct ScriptedProvider {
        script: Mutex<VecDeque<ProviderResponse>>,
        last: Mutex<Option<ProviderResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            Self {
                script: Mutex::new(responses.into_iter().collect()),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::AzureAnthropic
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn send_messages(&self, _payload: &Value) -> AnyResult<ProviderResponse> {
            let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
            match script.pop_front() {
                Some(response) => {
                    *self.last.lock().unwrap_or_else(|p| p.into_inner()) =
                        Some(response.clone());
                    Ok(response)
                }
                None => self
                    .last
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("script exhausted")),
            }
        }
    }

    fn terminal(text: &str) -> ProviderResponse {
        ProviderResponse {
            status: 200,
            body: json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "scripted-model",
                "content": [{"type": "text", "text": text}],
                "stop_reason": "end_turn",
            }),
        }
    }

    async fn test_app(responses: Vec<ProviderResponse>) -> (axum::Router, tempfile::TempDir) {
        test_app_with_mcp(responses, vec![]).await
    }

    async fn test_app_with_mcp(
        responses: Vec<ProviderResponse>,
        manifest_dirs: Vec<std::path::PathBuf>,
    ) -> (axum::Router, tempfile::TempDir) {
        let workspace = tempfile::tempdir().expect("tempdir");
        let config = EnvConfig {
            server: ServerConfig {
                port: 0,
                workspace_root: workspace.path().to_path_buf(),
                session_db_path: workspace.path().join("sessions.db"),
                test_command: None,
            },
            provider: ProviderConfig {
                kind: ProviderKind::AzureAnthropic,
                databricks_api_base: None,
                databricks_api_key: None,
                databricks_endpoint_path: None,
                databricks_default_model: "m".into(),
                azure_endpoint: Some("http://localhost:9/".into()),
                azure_api_key: Some("test".into()),
                azure_anthropic_version: "2023-06-01".into(),
            },
            cache: CacheConfig::default(),
            policy: PolicyConfig::default(),
            mcp: McpConfig {
                manifest_file: None,
                manifest_dirs,
            },
            sandbox: SandboxConfig::default(),
            web_search: WebSearchConfig::default(),
        };
        let provider = Arc::new(ScriptedProvider::new(responses));
        let state = AppState::with_provider_in_memory(config, provider)
            .await
            .expect("state");
        (create_router(state), workspace)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = test_app(vec![]).await;
        let response = app
            .oneshot(Request::get("/health").body(AxumBody::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_metrics_counts_requests() {
        let (app, _dir) = test_app(vec![terminal("ok")]).await;

        let post = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .body(AxumBody::from(
                json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
                    .to_string(),
            ))
            .expect("req");
        app.clone().oneshot(post).await.expect("response");

        let response = app
            .oneshot(Request::get("/metrics").body(AxumBody::empty()).expect("req"))
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body["requests"], 1);
        assert_eq!(body["responses"]["success"], 1);
    }

    #[tokio::test]
    async fn test_messages_unary_with_session_header() {
        let (app, _dir) = test_app(vec![terminal("hello back")]).await;

        let request = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .header("x-session-id", "sess-42")
            .body(AxumBody::from(
                json!({"model": "m", "messages": [{"role": "user", "content": "hello"}]})
                    .to_string(),
            ))
            .expect("req");
        let response = app.clone().oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-termination-reason")
                .and_then(|v| v.to_str().ok()),
            Some("completion")
        );
        assert_eq!(
            response
                .headers()
                .get("x-session-id")
                .and_then(|v| v.to_str().ok()),
            Some("sess-42")
        );
        let body = body_json(response).await;
        assert_eq!(body["content"][0]["text"], "hello back");

        // The session is inspectable through the debug endpoint
        let debug = app
            .oneshot(
                Request::get("/debug/session")
                    .header("x-session-id", "sess-42")
                    .body(AxumBody::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(debug.status(), StatusCode::OK);
        let body = body_json(debug).await;
        assert_eq!(body["session"]["id"], "sess-42");
        assert_eq!(body["history"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_debug_session_requires_header() {
        let (app, _dir) = test_app(vec![]).await;
        let response = app
            .oneshot(
                Request::get("/debug/session")
                    .body(AxumBody::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_debug_session_unknown_is_404() {
        let (app, _dir) = test_app(vec![]).await;
        let response = app
            .oneshot(
                Request::get("/debug/session")
                    .header("x-session-id", "nope")
                    .body(AxumBody::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_provider_error_passes_through_http() {
        let (app, _dir) = test_app(vec![ProviderResponse {
            status: 429,
            body: json!({"error": {"type": "rate_limit"}}),
        }])
        .await;

        let request = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .body(AxumBody::from(
                json!({"model": "m", "messages": [{"role": "user", "content": "x"}]})
                    .to_string(),
            ))
            .expect("req");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "rate_limit");
    }

    #[tokio::test]
    async fn test_sse_stream_shape() {
        let (app, _dir) = test_app(vec![terminal("streamed answer")]).await;

        let request = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .header("x-session-id", "sse-1")
            .body(AxumBody::from(
                json!({
                    "model": "m",
                    "stream": true,
                    "messages": [{"role": "user", "content": "hi"}]
                })
                .to_string(),
            ))
            .expect("req");
        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert_eq!(
            response
                .headers()
                .get(header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );

        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let text = String::from_utf8_lossy(&bytes);

        // Exactly one message event followed by one end event
        assert_eq!(text.matches("event: message").count(), 1);
        assert_eq!(text.matches("event: end").count(), 1);

        let mut message_data = None;
        let mut end_data = None;
        for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
            let mut event = "";
            let mut data = "";
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = rest;
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = rest;
                }
            }
            match event {
                "message" => message_data = Some(data.to_string()),
                "end" => end_data = Some(data.to_string()),
                _ => {}
            }
        }

        let message: Value =
            serde_json::from_str(&message_data.expect("message event")).expect("json");
        assert_eq!(message["type"], "message");
        assert_eq!(message["message"]["content"][0]["text"], "streamed answer");

        let end: Value = serde_json::from_str(&end_data.expect("end event")).expect("json");
        assert_eq!(end["termination"], "completion");
    }

    #[tokio::test]
    async fn test_remote_mcp_tool_round_trip() {
        // Manifest declares a stub server whose one tool echoes a reply
        let manifests = tempfile::tempdir().expect("tempdir");
        let script = r#"while read -r line; do
            id=$(printf '%s' "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
            if [ -z "$id" ]; then continue; fi
            case "$line" in
                *tools/list*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"echo"}]}}\n' "$id" ;;
                *tools/call*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed: hi"}]}}\n' "$id" ;;
                *)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
            esac
        done"#;
        std::fs::write(
            manifests.path().join("demo.json"),
            serde_json::to_string(
                &json!([{"id": "demo", "command": "sh", "args": ["-c", script]}]),
            )
            .expect("serialize"),
        )
        .expect("write");

        let tool_call = ProviderResponse {
            status: 200,
            body: json!({
                "content": [
                    {"type": "tool_use", "id": "t1", "name": "mcp_demo_echo",
                     "input": {"msg": "hi"}}
                ]
            }),
        };
        let (app, _dir) = test_app_with_mcp(
            vec![tool_call, terminal("relayed the echo")],
            vec![manifests.path().to_path_buf()],
        )
        .await;

        let request = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .header("x-session-id", "mcp-sess")
            .body(AxumBody::from(
                json!({"model": "m", "messages": [{"role": "user", "content": "echo hi"}]})
                    .to_string(),
            ))
            .expect("req");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["content"][0]["text"], "relayed the echo");

        // The tool turn embeds the server's JSON-RPC reply
        let debug = app
            .oneshot(
                Request::get("/debug/session")
                    .header("x-session-id", "mcp-sess")
                    .body(AxumBody::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        let session = body_json(debug).await;
        let history = session["history"].as_array().expect("history");
        let tool_turn = history
            .iter()
            .find(|t| t["role"] == "tool")
            .expect("tool turn");
        assert_eq!(tool_turn["content"]["tool"], "mcp_demo_echo");
        assert_eq!(tool_turn["content"]["content"], "echoed: hi");
    }

    #[tokio::test]
    async fn test_sse_matches_unary_body() {
        let (app, _dir) = test_app(vec![terminal("same answer"), terminal("same answer")]).await;

        let unary_req = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .body(AxumBody::from(
                json!({"model": "m", "messages": [{"role": "user", "content": "q"}]})
                    .to_string(),
            ))
            .expect("req");
        let unary = body_json(app.clone().oneshot(unary_req).await.expect("response")).await;

        let sse_req = Request::post("/v1/messages")
            .header("content-type", "application/json")
            .body(AxumBody::from(
                json!({
                    "model": "m",
                    "stream": true,
                    "messages": [{"role": "user", "content": "q"}]
                })
                .to_string(),
            ))
            .expect("req");
        let response = app.oneshot(sse_req).await.expect("response");
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let message_line = text
            .lines()
            .find(|l| l.starts_with("data: ") && l.contains("\"type\":\"message\""))
            .expect("message data line");
        let message: Value =
            serde_json::from_str(message_line.trim_start_matches("data: ")).expect("json");

        assert_eq!(message["message"], unary);
    }
}
