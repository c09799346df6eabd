//! Workflow CRUD and version history.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::{Workflow, WorkflowGraph};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/workflows", get(list_workflows))
        .route("/v1/workflows", post(create_workflow))
        .route("/v1/workflows/{id}", get(get_workflow))
        .route("/v1/workflows/{id}", put(update_workflow))
        .route("/v1/workflows/{id}", delete(delete_workflow))
        .route("/v1/workflows/{id}/versions", get(list_versions))
}

#[derive(Debug, Deserialize)]
struct WorkflowBody {
    name: String,
    #[serde(default)]
    graph: WorkflowGraph,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.store.list_workflows().await?;
    Ok(Json(json!(workflows)))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .store
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown workflow \"{id}\"")))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<WorkflowBody>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("workflow name is required".to_string()));
    }
    let now = Utc::now();
    let workflow = Workflow {
        id: format!("wf_{}", ulid::Ulid::new()),
        name: body.name,
        graph: body.graph,
        version: 0,
        enabled: body.enabled,
        created_at: now,
        updated_at: now,
    };
    let stored = state.store.put_workflow(&workflow).await?;
    tracing::info!(workflow_id = %stored.id, "workflow created");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WorkflowBody>,
) -> Result<Json<Workflow>, ApiError> {
    let existing = state
        .store
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown workflow \"{id}\"")))?;

    let workflow = Workflow {
        id: existing.id,
        name: body.name,
        graph: body.graph,
        version: existing.version,
        enabled: body.enabled,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    let stored = state.store.put_workflow(&workflow).await?;
    Ok(Json(stored))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_workflow(&id).await? {
        return Err(ApiError::NotFound(format!("unknown workflow \"{id}\"")));
    }
    tracing::info!(workflow_id = %id, "workflow deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_workflow(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("unknown workflow \"{id}\"")));
    }
    let versions = state.store.list_workflow_versions(&id).await?;
    let data: Vec<Value> = versions
        .into_iter()
        .map(|(version, graph)| json!({ "version": version, "graph": graph }))
        .collect();
    Ok(Json(json!(data)))
}
