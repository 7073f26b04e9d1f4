//! Edge HTTP endpoints: snapshot push and health.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::error;

use super::Reconciler;
use crate::constants::{SNAPSHOT_VERSION_HEADER, SYNC_USERS_PATH};
use crate::sync::SyncError;
use crate::sync::protocol::{ErrorBody, SyncResponse};
use crate::user::UserRecord;

pub fn edge_router(reconciler: Arc<Reconciler>) -> Router {
    Router::new()
        .route(SYNC_USERS_PATH, post(receive_snapshot))
        .route("/health", get(health))
        .with_state(reconciler)
}

/// A missing or unparsable header means "always apply".
fn snapshot_version(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(SNAPSHOT_VERSION_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn receive_snapshot(
    State(reconciler): State<Arc<Reconciler>>,
    headers: HeaderMap,
    Json(users): Json<Vec<UserRecord>>,
) -> Result<Json<SyncResponse>, (StatusCode, Json<ErrorBody>)> {
    let version = snapshot_version(&headers);
    // Runs detached so a dropped connection cannot cancel it between the
    // mirror commit and artifact regeneration.
    let task = tokio::spawn(async move { reconciler.reconcile(users, version).await });
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join_err) => Err(SyncError::CycleFailed(join_err.to_string()).into()),
    };
    match outcome {
        Ok(result) => Ok(Json(result.to_response())),
        Err(e) => {
            error!("Snapshot rejected: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    detail: format!("Error synchronizing users: {e}"),
                }),
            ))
        }
    }
}

async fn health(State(reconciler): State<Arc<Reconciler>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "role": "edge",
        "state": reconciler.state().as_str(),
    }))
}
