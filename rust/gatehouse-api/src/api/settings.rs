//! Settings, including distributed encryption-key rotation.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

/// Name of the cluster lock serializing rotations.
pub const ROTATION_LOCK: &str = "encryption-key-rotation";

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/settings/rotate-key", post(rotate_key))
}

#[derive(Debug, Deserialize)]
struct RotateKeyBody {
    passphrase: String,
}

/// Re-encrypt stored secrets under a key derived from the new passphrase,
/// rebuild provider handles, and broadcast the key to peers. Unacked peers
/// are logged and may need a restart.
async fn rotate_key(
    State(state): State<AppState>,
    Json(body): Json<RotateKeyBody>,
) -> Result<Json<Value>, ApiError> {
    if body.passphrase.is_empty() {
        return Err(ApiError::BadRequest("passphrase is required".to_string()));
    }

    if let Some(ref cluster) = state.cluster {
        let acquired = cluster
            .acquire_lock_timeout(ROTATION_LOCK, std::time::Duration::from_secs(30))
            .await;
        if !acquired {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "could not acquire the {ROTATION_LOCK} cluster lock"
            )));
        }
    }

    let key = state.store.rotate_key(&body.passphrase).await?;
    state.reload_providers().await?;

    let peers_acked = match state.cluster {
        Some(ref cluster) => Some(cluster.broadcast_key(key).await),
        None => None,
    };

    tracing::info!("encryption key rotated");
    Ok(Json(json!({
        "rotated": true,
        "peers_acked": peers_acked,
    })))
}
