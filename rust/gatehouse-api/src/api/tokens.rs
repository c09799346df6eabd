//! API token management. The raw token appears exactly once, in the
//! creation response; afterwards only the display prefix is recoverable.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/api-tokens", get(list_tokens))
        .route("/v1/api-tokens", post(create_token))
        .route("/v1/api-tokens/{id}", delete(delete_token))
}

#[derive(Debug, Deserialize)]
struct CreateTokenBody {
    name: String,
    #[serde(default)]
    allowed_providers: Option<Vec<String>>,
    #[serde(default)]
    allowed_models: Option<Vec<String>>,
    #[serde(default)]
    allowed_webhooks: Option<Vec<String>>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

async fn list_tokens(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tokens = state.store.list_tokens().await?;
    Ok(Json(json!(tokens)))
}

async fn create_token(
    State(state): State<AppState>,
    Json(body): Json<CreateTokenBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("token name is required".to_string()));
    }

    let (token, raw) = state
        .store
        .create_token(
            &body.name,
            body.allowed_providers,
            body.allowed_models,
            body.allowed_webhooks,
            body.expires_at,
        )
        .await?;

    tracing::info!(token_id = %token.id, name = %token.name, "api token created");

    let mut value = serde_json::to_value(&token).unwrap_or_default();
    value["token"] = json!(raw);
    Ok((StatusCode::CREATED, Json(value)))
}

async fn delete_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_token(&id).await? {
        return Err(ApiError::NotFound(format!("unknown token \"{id}\"")));
    }
    tracing::info!(token_id = %id, "api token deleted");
    Ok(StatusCode::NO_CONTENT)
}
