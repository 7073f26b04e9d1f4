//! Authority HTTP endpoints: edge registration, liveness, password relay,
//! manual sync, health.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use zeroize::Zeroizing;

use super::Authority;
use crate::constants::EDGE_HOST_HEADER;
use crate::registry::{EdgeDescriptor, EdgeRegistration, EdgeRegistry, Liveness};
use crate::server::ApiError;
use crate::sync::protocol::{LivenessUpdate, PasswordRelayRequest, PasswordRelayResponse};
use crate::sync::{CycleReport, SyncHandle, SyncReason, SyncScheduler};

/// Everything the authority handlers need.
#[derive(Debug, Clone)]
pub struct AuthorityState {
    pub authority: Authority,
    pub registry: EdgeRegistry,
    pub sync: SyncHandle,
}

pub fn router(state: AuthorityState) -> Router {
    Router::new()
        .route("/api/edges", get(list_edges))
        .route("/api/edges/register", post(register_edge))
        .route("/api/edges/{id}/liveness", put(set_liveness))
        .route(
            "/api/users/{username}/change-password-from-edge",
            post(relay_password),
        )
        .route("/api/sync/users/manual", post(manual_sync))
        .route("/health", get(health))
        .with_state(state)
}

async fn list_edges(
    State(state): State<AuthorityState>,
) -> Result<Json<Vec<EdgeDescriptor>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

/// Registration brings the edge online, so it gets a full snapshot right away.
async fn register_edge(
    State(state): State<AuthorityState>,
    Json(registration): Json<EdgeRegistration>,
) -> Result<Json<EdgeDescriptor>, ApiError> {
    let edge = state.registry.register(&registration).await?;
    state.sync.schedule(SyncReason::EdgeRegistered);
    Ok(Json(edge))
}

async fn set_liveness(
    State(state): State<AuthorityState>,
    Path(id): Path<i64>,
    Json(update): Json<LivenessUpdate>,
) -> Result<Json<EdgeDescriptor>, ApiError> {
    let edge = state
        .registry
        .set_liveness(id, Liveness::from(update.online))
        .await?;
    Ok(Json(edge))
}

async fn relay_password(
    State(state): State<AuthorityState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PasswordRelayRequest>,
) -> Result<Json<PasswordRelayResponse>, ApiError> {
    let password = Zeroizing::new(request.new_password);
    let source_edge = headers
        .get(EDGE_HOST_HEADER)
        .and_then(|value| value.to_str().ok());
    let response = state
        .authority
        .relay_password_change(&username, &password, source_edge)
        .await?;
    Ok(Json(response))
}

async fn manual_sync(State(state): State<AuthorityState>) -> Result<Json<CycleReport>, ApiError> {
    Ok(Json(state.sync.run_cycle(SyncReason::Manual).await?))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "role": "authority" }))
}
