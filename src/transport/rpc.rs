//! JSON-RPC 2.0 dispatch for the three lifecycle methods plus a small
//! introspection method.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{MilestoneCategory, MilestoneComplexity};
use crate::coordinator::{MilestoneInput, SessionEndParams, SessionStartParams};
use crate::error::CoordinatorError;

use super::{AppState, CONNECTION_ID_HEADER};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Value,
}

pub async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<RpcRequest>) -> Response {
    // First request from a connection carries no id; the transport assigns
    // one and the caller is expected to persist it from the response header
    // for every subsequent call on that logical connection.
    let (connection_id, is_fresh) = match headers.get(CONNECTION_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => (id.to_string(), false),
        _ => (uuid::Uuid::new_v4().to_string(), true),
    };

    let id = request.id.clone();
    let outcome = dispatch(&state, &connection_id, &request.method, request.params).await;

    let mut response = match outcome {
        Ok(result) => Json(RpcResponse { jsonrpc: "2.0", result: Some(result), error: None, id }).into_response(),
        Err(err) => Json(RpcResponse {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code: err.rpc_code(), message: err.to_string() }),
            id,
        })
        .into_response(),
    };

    if is_fresh {
        if let Ok(value) = HeaderValue::from_str(&connection_id) {
            response.headers_mut().insert(CONNECTION_ID_HEADER, value);
        }
    }
    response
}

async fn dispatch(state: &AppState, connection_id: &str, method: &str, params: Value) -> Result<Value, CoordinatorError> {
    match method {
        "session_start" => {
            let params = parse_session_start(params);
            let outcome = state.0.coordinator.session_start(connection_id.to_string(), params).await?;
            Ok(serde_json::json!({"session_id": outcome.session_id, "message": outcome.message}))
        }
        "useai_heartbeat" => {
            let outcome = state.0.coordinator.heartbeat(connection_id.to_string()).await?;
            Ok(serde_json::json!({"message": outcome.message}))
        }
        "session_end" => {
            let params = parse_session_end(params);
            let outcome = state.0.coordinator.session_end(connection_id.to_string(), params).await?;
            Ok(serde_json::json!({"session_id": outcome.session_id, "seal": outcome.seal}))
        }
        "useai_describe" => Ok(serde_json::json!({
            "name": "useaid",
            "version": crate::build_info::VERSION,
        })),
        other => Err(CoordinatorError::UnknownSession.tap_unknown_method(other)),
    }
}

fn parse_session_start(params: Value) -> SessionStartParams {
    SessionStartParams {
        client: params.get("client").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
        task_type: params.get("task_type").and_then(|v| v.as_str()).unwrap_or("coding").to_string(),
        project: params.get("project").and_then(|v| v.as_str()).map(String::from),
        title: params.get("title").and_then(|v| v.as_str()).map(String::from),
        private_title: params.get("private_title").and_then(|v| v.as_str()).map(String::from),
        model: params.get("model").and_then(|v| v.as_str()).map(String::from),
        prompt_summary: params.get("prompt_summary").and_then(|v| v.as_str()).map(String::from),
        conversation_id: params.get("conversation_id").and_then(|v| v.as_str()).map(String::from),
        conversation_index: params.get("conversation_index").and_then(|v| v.as_u64()),
    }
}

fn parse_session_end(params: Value) -> SessionEndParams {
    let languages = params
        .get("languages")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let files_touched = params.get("files_touched").and_then(|v| v.as_u64()).unwrap_or(0);
    let evaluation = params.get("evaluation").cloned();
    let milestones = params
        .get("milestones")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(parse_milestone).collect())
        .unwrap_or_default();
    SessionEndParams { languages, files_touched, evaluation, milestones }
}

fn parse_milestone(value: &Value) -> Option<MilestoneInput> {
    Some(MilestoneInput {
        title: value.get("title")?.as_str()?.to_string(),
        private_title: value.get("private_title").and_then(|v| v.as_str()).map(String::from),
        category: serde_json::from_value(value.get("category").cloned()?).unwrap_or(MilestoneCategory::Other),
        complexity: serde_json::from_value(value.get("complexity").cloned()?).unwrap_or(MilestoneComplexity::Medium),
        duration_minutes: value.get("duration_minutes").and_then(|v| v.as_u64()).unwrap_or(0),
        languages: value
            .get("languages")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
    })
}

trait TapUnknownMethod {
    fn tap_unknown_method(self, method: &str) -> Self;
}

impl TapUnknownMethod for CoordinatorError {
    fn tap_unknown_method(self, method: &str) -> Self {
        tracing::warn!(method, "unknown JSON-RPC method");
        self
    }
}
