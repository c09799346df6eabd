//! The OpenAI-compatible gateway surface.
//!
//! Routes under `/gateway/v1`: chat completions (streaming and not), model
//! listing, and the native pass-through proxy.

pub mod auth;
pub mod chat;
pub mod models;
pub mod native;
pub mod route;
pub mod streaming;

use axum::routing::{any, get, post};
use axum::Router;

use crate::AppState;

/// Create the gateway router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route(
            "/v1/native/{provider_key}/{*upstream_path}",
            any(native::native_proxy),
        )
}
