//! HTTP server assembly.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cluster::Cluster;
use crate::config::AppConfig;
use crate::gateway::auth::Authenticator;
use crate::llm::providers;
use crate::llm::registry::ProviderRegistry;
use crate::llm::signatures::SignatureCache;
use crate::logging::OpTimer;
use crate::runs::RunSupervisor;
use crate::store::Store;
use crate::workflow::{Engine, NodeRegistry};
use crate::{api, gateway, webhooks, AppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the application state and router.
pub async fn create_app(config: AppConfig) -> anyhow::Result<(Router, AppState)> {
    let overall = OpTimer::new("server", "create_app");
    tracing::info!(version = VERSION, "starting gatehouse-api");

    let config = Arc::new(config);

    let timer = OpTimer::new("store", "open");
    if let Some(parent) = std::path::Path::new(&config.storage.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Store::open(
        config.storage.db_path.as_str(),
        config.storage.passphrase.as_deref(),
    )
    .await?;
    timer.finish();

    let signatures = Arc::new(SignatureCache::new(config.gateway.signature_cache_size));
    let factory = providers::factory(signatures.clone());
    let registry = Arc::new(ProviderRegistry::new());
    let authenticator = Arc::new(Authenticator::new(config.auth.tokens.clone(), store.clone()));
    let runs = RunSupervisor::new();

    // Node handlers beyond the built-ins are registered by the embedder.
    let handlers = Arc::new(NodeRegistry::new());
    let engine = Arc::new(Engine::new(handlers, Arc::new(store.clone())));

    let cluster = match config.cluster {
        Some(ref cluster_config) => Some(Cluster::start(cluster_config, store.clone()).await?),
        None => None,
    };

    let state = AppState {
        config: config.clone(),
        store,
        registry,
        signatures,
        authenticator,
        runs,
        engine,
        cluster,
        factory,
    };

    let timer = OpTimer::new("registry", "load");
    state.reload_providers().await?;
    tracing::info!(providers = ?state.registry.keys(), "provider registry loaded");
    timer.finish();

    let app = routes(state.clone(), &config.server.base_path);
    overall.finish();
    Ok((app, state))
}

/// Compose the full route tree.
pub fn routes(state: AppState, base_path: &str) -> Router {
    let app = Router::new()
        .nest("/gateway", gateway::router())
        .nest("/api", api::router())
        .nest("/webhooks", webhooks::router())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        app
    } else {
        Router::new().nest(base, app)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": VERSION }))
}
