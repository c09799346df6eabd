//! Trigger CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::{Trigger, TriggerKind};
use crate::error::ApiError;
use crate::scheduler::cron::CronExpression;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/triggers", get(list_triggers))
        .route("/v1/triggers", post(create_trigger))
        .route("/v1/triggers/{id}", put(update_trigger))
        .route("/v1/triggers/{id}", delete(delete_trigger))
}

#[derive(Debug, Deserialize)]
struct TriggerBody {
    workflow_id: String,
    #[serde(rename = "type")]
    kind: TriggerKind,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn validate(body: &TriggerBody) -> Result<(), ApiError> {
    if body.workflow_id.is_empty() {
        return Err(ApiError::BadRequest("workflow_id is required".to_string()));
    }
    if body.kind == TriggerKind::Cron {
        let schedule = body
            .config
            .get("schedule")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ApiError::BadRequest("cron triggers require config.schedule".to_string())
            })?;
        CronExpression::parse(schedule)
            .map_err(|err| ApiError::BadRequest(format!("invalid cron schedule: {err}")))?;
    }
    Ok(())
}

async fn list_triggers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let triggers = state.store.list_triggers().await?;
    Ok(Json(json!(triggers)))
}

async fn create_trigger(
    State(state): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, Json<Trigger>), ApiError> {
    validate(&body)?;
    let now = Utc::now();
    let trigger = Trigger {
        id: uuid::Uuid::new_v4().to_string(),
        workflow_id: body.workflow_id,
        kind: body.kind,
        config: body.config,
        alias: body.alias,
        public: body.public,
        enabled: body.enabled,
        created_at: now,
        updated_at: now,
    };
    state
        .store
        .put_trigger(&trigger)
        .await
        .map_err(|err| ApiError::BadRequest(format!("failed to create trigger: {err}")))?;
    tracing::info!(trigger_id = %trigger.id, kind = %trigger.kind.as_str(), "trigger created");
    Ok((StatusCode::CREATED, Json(trigger)))
}

async fn update_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<Trigger>, ApiError> {
    validate(&body)?;
    let existing = state
        .store
        .get_trigger(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown trigger \"{id}\"")))?;

    let trigger = Trigger {
        id: existing.id,
        workflow_id: body.workflow_id,
        kind: body.kind,
        config: body.config,
        alias: body.alias,
        public: body.public,
        enabled: body.enabled,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    state
        .store
        .put_trigger(&trigger)
        .await
        .map_err(|err| ApiError::BadRequest(format!("failed to update trigger: {err}")))?;
    Ok(Json(trigger))
}

async fn delete_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_trigger(&id).await? {
        return Err(ApiError::NotFound(format!("unknown trigger \"{id}\"")));
    }
    Ok(StatusCode::NO_CONTENT)
}
