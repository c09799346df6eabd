//! Provider CRUD. Every mutation reloads the in-memory registry so the
//! gateway dispatches against the persisted catalog.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::domain::{ProviderConfig, ProviderRecord};
use crate::error::ApiError;
use crate::AppState;

/// Redaction sentinel for secrets in list responses.
const REDACTED: &str = "***";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{key}", put(put_provider))
        .route("/v1/providers/{key}", get(get_provider))
        .route("/v1/providers/{key}", delete(delete_provider))
}

fn redact(record: ProviderRecord) -> Value {
    let mut value = serde_json::to_value(&record).unwrap_or_default();
    if record.config.api_key.is_some() {
        value["api_key"] = json!(REDACTED);
    }
    value
}

async fn list_providers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.store.list_providers().await?;
    Ok(Json(json!(records
        .into_iter()
        .map(redact)
        .collect::<Vec<_>>())))
}

async fn get_provider(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .get_provider(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown provider \"{key}\"")))?;
    Ok(Json(redact(record)))
}

async fn put_provider(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(config): Json<ProviderConfig>,
) -> Result<Json<Value>, ApiError> {
    if key.is_empty() || key.contains('/') {
        return Err(ApiError::BadRequest(
            "provider key must be non-empty and contain no '/'".to_string(),
        ));
    }
    if config.model.is_empty() {
        return Err(ApiError::BadRequest(
            "provider default model must be non-empty".to_string(),
        ));
    }

    let record = state.store.put_provider(&key, &config).await?;
    state.reload_provider(&key).await?;
    tracing::info!(provider = %key, kind = %config.kind.as_str(), "provider updated");
    Ok(Json(redact(record)))
}

async fn delete_provider(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_provider(&key).await? {
        return Err(ApiError::NotFound(format!("unknown provider \"{key}\"")));
    }
    state.registry.remove(&key);
    tracing::info!(provider = %key, "provider deleted");
    Ok(StatusCode::NO_CONTENT)
}
