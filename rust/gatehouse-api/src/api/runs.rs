//! Active-run listing and cancellation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/{id}/cancel", post(cancel_run))
}

async fn list_runs(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.runs.list()))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.runs.cancel(&id) {
        return Err(ApiError::NotFound(format!("unknown run \"{id}\"")));
    }
    Ok(Json(json!({ "run_id": id, "cancelled": true })))
}
