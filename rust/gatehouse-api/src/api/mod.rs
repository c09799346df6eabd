//! Admin API surface.
//!
//! CRUD for the catalog the gateway core consumes, plus run control and
//! key rotation. These routes sit behind an external forward-auth chain,
//! so no bearer check happens here.

pub mod providers;
pub mod runs;
pub mod settings;
pub mod tokens;
pub mod triggers;
pub mod workflows;

use axum::routing::post;
use axum::Router;

use crate::gateway::chat::admin_chat_completions;
use crate::AppState;

/// Create the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(admin_chat_completions))
        .merge(providers::router())
        .merge(tokens::router())
        .merge(triggers::router())
        .merge(workflows::router())
        .merge(runs::router())
        .merge(settings::router())
}
