// src/web/api.rs
// Small endpoints: health, metrics, session debugging

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Value, json};

use super::state::AppState;

/// Session id headers, in resolution order.
pub const SESSION_ID_HEADERS: &[&str] = &[
    "x-session-id",
    "x-claude-session-id",
    "x-claude-session",
    "x-claude-conversation-id",
    "anthropic-session-id",
];

/// Session id body fields, in resolution order (after the headers).
pub const SESSION_ID_BODY_FIELDS: &[&str] = &["session_id", "sessionId", "conversation_id"];

/// Resolve the session id for a request. Returns (id, generated).
pub fn resolve_session_id(headers: &HeaderMap, body: &Value) -> (String, bool) {
    for name in SESSION_ID_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if !value.trim().is_empty() {
                return (value.trim().to_string(), false);
            }
        }
    }
    for field in SESSION_ID_BODY_FIELDS {
        if let Some(value) = body.get(*field).and_then(Value::as_str) {
            if !value.trim().is_empty() {
                return (value.trim().to_string(), false);
            }
        }
    }
    (uuid::Uuid::new_v4().to_string(), true)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.metrics.snapshot())
}

/// GET /debug/session - dump the persisted session named by the header.
pub async fn debug_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let session_id = SESSION_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::to_string);

    let Some(session_id) = session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing_session_header"})),
        );
    };

    let session = match state.store().get_session(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "session_not_found", "session_id": session_id})),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal_error", "message": e.to_string()})),
            );
        }
    };

    let history = match state.store().get_history(&session_id).await {
        Ok(history) => history,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal_error", "message": e.to_string()})),
            );
        }
    };

    (
        StatusCode::OK,
        Json(json!({"session": session, "history": history})),
    )
}

/// DELETE /debug/session - drop a session and its history.
pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let session_id = SESSION_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::to_string);

    let Some(session_id) = session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing_session_header"})),
        );
    };

    match state.store().delete_session(&session_id).await {
        Ok(true) => (StatusCode::OK, Json(json!({"deleted": session_id}))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "session_not_found", "session_id": session_id})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal_error", "message": e.to_string()})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_session_id_header_order() {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-session-id", "low".parse().expect("value"));
        headers.insert("x-session-id", "high".parse().expect("value"));
        let (id, generated) = resolve_session_id(&headers, &json!({}));
        assert_eq!(id, "high");
        assert!(!generated);
    }

    #[test]
    fn test_resolve_session_id_body_fallback() {
        let headers = HeaderMap::new();
        let (id, generated) =
            resolve_session_id(&headers, &json!({"session_id": "from-body"}));
        assert_eq!(id, "from-body");
        assert!(!generated);

        let (id, _) = resolve_session_id(&headers, &json!({"sessionId": "camel"}));
        assert_eq!(id, "camel");

        let (id, _) = resolve_session_id(&headers, &json!({"conversation_id": "conv"}));
        assert_eq!(id, "conv");
    }

    #[test]
    fn test_resolve_session_id_generated() {
        let (id, generated) = resolve_session_id(&HeaderMap::new(), &json!({}));
        assert!(generated);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_headers_beat_body() {
        let mut headers = HeaderMap::new();
        headers.insert("x-claude-session-id", "header-wins".parse().expect("value"));
        let (id, _) = resolve_session_id(&headers, &json!({"session_id": "body"}));
        assert_eq!(id, "header-wins");
    }
}
