//! Model listing visible to the calling token.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

/// `GET /gateway/v1/models` - every `provider/model` the token may use.
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let auth = state.authenticator.authenticate(&headers).await?;

    let mut data: Vec<Value> = Vec::new();
    for key in state.registry.keys() {
        let Some(handle) = state.registry.get(&key) else {
            continue;
        };
        let models: Vec<&String> = if handle.models.is_empty() {
            vec![&handle.default_model]
        } else {
            handle.models.iter().collect()
        };
        for model in models {
            let id = format!("{key}/{model}");
            if auth.is_model_allowed(&key, &id) {
                data.push(json!({
                    "id": id,
                    "object": "model",
                    "owned_by": key,
                }));
            }
        }
    }

    Ok(Json(json!({ "object": "list", "data": data })))
}
