//! Local HTTP transport: a JSON-RPC 2.0 endpoint for the lifecycle calls
//! plus the REST query/config/auth-proxy surface. Bound to 127.0.0.1 only.
//!
//! Grounded on the gateway's axum layering (`Router` + `ServiceBuilder` +
//! `tower_http` trace/panic/cors layers, one shared `Arc`-wrapped state),
//! generalized from a chain-RPC gateway to this daemon's session-lifecycle
//! RPC plus REST surface.

mod rest;
mod rpc;

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chain::ChainStore;
use crate::config::DaemonConfig;
use crate::coordinator::CoordinatorHandle;
use crate::index::{MilestonesIndex, SessionsIndex};

/// Header carrying the transport-assigned connection id (spec.md §6).
pub const CONNECTION_ID_HEADER: &str = "x-useai-connection-id";

pub(crate) struct Inner {
    pub coordinator: CoordinatorHandle,
    pub chain: ChainStore,
    pub sessions_index: SessionsIndex,
    pub milestones_index: MilestonesIndex,
    pub config: std::sync::Mutex<DaemonConfig>,
    pub root_dir: std::path::PathBuf,
    pub http_client: reqwest::Client,
    pub started_at: Instant,
}

#[derive(Clone)]
pub struct AppState(pub(crate) Arc<Inner>);

pub struct TransportDeps {
    pub coordinator: CoordinatorHandle,
    pub chain: ChainStore,
    pub sessions_index: SessionsIndex,
    pub milestones_index: MilestonesIndex,
    pub config: DaemonConfig,
    pub root_dir: std::path::PathBuf,
}

/// Build the full router (JSON-RPC + REST), ready to be served with
/// `axum::serve`.
pub fn build_router(deps: TransportDeps) -> Router {
    let state = AppState(Arc::new(Inner {
        coordinator: deps.coordinator,
        chain: deps.chain,
        sessions_index: deps.sessions_index,
        milestones_index: deps.milestones_index,
        config: std::sync::Mutex::new(deps.config),
        root_dir: deps.root_dir,
        http_client: reqwest::Client::new(),
        started_at: Instant::now(),
    }));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([HeaderName::from_static(CONNECTION_ID_HEADER), axum::http::header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(is_local_origin).unwrap_or(false)
        }));

    Router::new()
        .route("/rpc", post(rpc::handle_rpc))
        .route("/health", get(rest::health))
        .route("/sessions", get(rest::list_sessions))
        .route("/milestones", get(rest::list_milestones))
        .route("/stats", get(rest::stats))
        .route("/config", get(rest::get_config).post(rest::post_config))
        .route("/sessions/:id", delete(rest::delete_session))
        .route("/conversations/:id", delete(rest::delete_conversation))
        .route("/milestones/:id", delete(rest::delete_milestone))
        .route("/seal-active", post(rest::seal_active))
        .route("/send-otp", post(rest::send_otp))
        .route("/verify-otp", post(rest::verify_otp))
        .route("/sync", post(rest::sync))
        .layer(ServiceBuilder::new().layer(CatchPanicLayer::new()).layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

fn is_local_origin(origin: &str) -> bool {
    let Some(rest) = origin.split("://").nth(1) else {
        return false;
    };
    let host = rest.split(':').next().unwrap_or(rest);
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_origin_accepts_loopback_hosts() {
        assert!(is_local_origin("http://localhost:3000"));
        assert!(is_local_origin("http://127.0.0.1:5173"));
        assert!(!is_local_origin("https://evil.example.com"));
    }
}
