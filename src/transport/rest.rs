//! REST handlers: health, read-only query surface, config, deletes, and the
//! auth-proxy passthrough endpoints (spec.md §6).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::config::DaemonConfig;
use crate::error::{ChainError, CoordinatorError, IndexError};

use super::AppState;

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match err {
            CoordinatorError::UnknownSession => StatusCode::NOT_FOUND,
            CoordinatorError::TransientIo(_) | CoordinatorError::IndexFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let active_sessions = state.0.chain.active_session_ids()?.len();
    let open_connections = state.0.coordinator.open_connections().await;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": crate::build_info::VERSION,
        "active_sessions": active_sessions,
        "open_connections": open_connections,
        "uptime_seconds": state.0.started_at.elapsed().as_secs(),
    })))
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = crate::query::list_sessions(&state.0.sessions_index)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

pub async fn list_milestones(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let milestones = crate::query::list_milestones(&state.0.milestones_index)?;
    Ok(Json(serde_json::json!({ "milestones": milestones })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = crate::query::compute_stats(&state.0.sessions_index)?;
    Ok(Json(serde_json::to_value(stats).expect("Stats always serializes")))
}

pub async fn get_config(State(state): State<AppState>) -> Json<DaemonConfig> {
    let config = state.0.config.lock().expect("config mutex poisoned").clone();
    Json(config.redacted())
}

pub async fn post_config(State(state): State<AppState>, Json(new_config): Json<DaemonConfig>) -> Result<Json<DaemonConfig>, ApiError> {
    crate::config::save_config(&state.0.root_dir, &new_config).map_err(|err| ApiError(StatusCode::BAD_REQUEST, err.to_string()))?;
    *state.0.config.lock().expect("config mutex poisoned") = new_config.clone();
    state.0.coordinator.update_config(new_config.clone()).await;
    Ok(Json(new_config.redacted()))
}

pub async fn delete_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = state.0.coordinator.delete_session(session_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn delete_conversation(State(state): State<AppState>, Path(conversation_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted_ids = state.0.coordinator.delete_conversation(conversation_id).await?;
    Ok(Json(serde_json::json!({ "deleted_session_ids": deleted_ids })))
}

pub async fn delete_milestone(State(state): State<AppState>, Path(milestone_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = state.0.coordinator.delete_milestone(milestone_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn seal_active(State(state): State<AppState>) -> Json<Value> {
    let sealed = state.0.coordinator.seal_active().await;
    Json(serde_json::json!({ "sealed": sealed }))
}

#[derive(Debug, Deserialize)]
pub struct OtpRequest {
    #[serde(flatten)]
    body: Value,
}

/// Forward a request body verbatim to the remote sync collaborator, passing
/// its response back unchanged (spec.md §6: the daemon proxies auth without
/// inspecting it).
async fn proxy(state: &AppState, path: &str, body: Value) -> Result<Response, ApiError> {
    let base_url = {
        let config = state.0.config.lock().expect("config mutex poisoned");
        config.sync_base_url.clone()
    };
    let Some(base_url) = base_url else {
        return Err(ApiError(StatusCode::SERVICE_UNAVAILABLE, "sync is not configured".to_string()));
    };
    let url = format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'));
    let response = state
        .0
        .http_client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|err| ApiError(StatusCode::BAD_GATEWAY, err.to_string()))?;
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let payload: Value = response.json().await.unwrap_or(Value::Null);
    Ok((status, Json(payload)).into_response())
}

pub async fn send_otp(State(state): State<AppState>, Json(body): Json<OtpRequest>) -> Result<Response, ApiError> {
    proxy(&state, "auth/send-otp", body.body).await
}

pub async fn verify_otp(State(state): State<AppState>, Json(body): Json<OtpRequest>) -> Result<Response, ApiError> {
    proxy(&state, "auth/verify-otp", body.body).await
}

pub async fn sync(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    proxy(&state, "sync", body).await
}
