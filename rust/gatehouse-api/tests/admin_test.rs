//! Admin surface tests: provider catalog, token lifecycle, key rotation.

use axum_test::TestServer;
use serde_json::{json, Value};

use gatehouse_api::config::AppConfig;
use gatehouse_api::server::{create_app, routes};
use gatehouse_api::AppState;

async fn test_state(passphrase: Option<&str>) -> (tempfile::TempDir, TestServer, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.db_path = dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();
    config.storage.passphrase = passphrase.map(ToString::to_string);

    let (_, state) = create_app(config).await.unwrap();
    let app = routes(state.clone(), "/");
    let server = TestServer::new(app).unwrap();
    (dir, server, state)
}

#[tokio::test]
async fn provider_upsert_loads_the_registry() {
    let (_dir, server, state) = test_state(None).await;

    let response = server
        .put("/api/v1/providers/openai")
        .json(&json!({
            "type": "openai",
            "api_key": "sk-secret",
            "model": "gpt-4o",
            "models": ["gpt-4o", "gpt-4.1"]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["api_key"], "***");
    assert_eq!(body["model"], "gpt-4o");

    let handle = state.registry.get("openai").expect("registry loaded");
    assert_eq!(handle.default_model, "gpt-4o");
    assert_eq!(handle.models, vec!["gpt-4o", "gpt-4.1"]);

    // Deletion clears the registry too.
    server.delete("/api/v1/providers/openai").await.assert_status(
        axum::http::StatusCode::NO_CONTENT,
    );
    assert!(state.registry.get("openai").is_none());
}

#[tokio::test]
async fn provider_with_empty_model_is_rejected() {
    let (_dir, server, _state) = test_state(None).await;

    let response = server
        .put("/api/v1/providers/openai")
        .json(&json!({"type": "openai", "model": ""}))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn token_lifecycle_over_http() {
    let (_dir, server, _state) = test_state(None).await;

    let created = server
        .post("/api/v1/api-tokens")
        .json(&json!({
            "name": "ci",
            "allowed_models": ["openai/gpt-4o"]
        }))
        .await;
    created.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = created.json();

    let raw = body["token"].as_str().unwrap();
    assert!(raw.starts_with("at_"));
    assert_eq!(raw.len(), 3 + 64);
    assert_eq!(body["token_prefix"], raw[..8]);
    assert!(body.get("token_hash").is_none());

    // Listing shows the prefix but never the raw token.
    let listed: Value = server.get("/api/v1/api-tokens").await.json();
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].get("token").is_none());
    assert_eq!(entries[0]["token_prefix"], raw[..8]);

    // The raw token authenticates on the gateway.
    let models = server
        .get("/gateway/v1/models")
        .add_header("authorization", format!("Bearer {raw}"))
        .await;
    models.assert_status_ok();

    // Deleting it revokes access.
    let id = body["id"].as_str().unwrap();
    server
        .delete(&format!("/api/v1/api-tokens/{id}"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let denied = server
        .get("/gateway/v1/models")
        .add_header("authorization", format!("Bearer {raw}"))
        .await;
    denied.assert_status_unauthorized();
}

#[tokio::test]
async fn rotate_key_keeps_provider_secrets_readable() {
    let (_dir, server, state) = test_state(Some("first-pass")).await;

    server
        .put("/api/v1/providers/openai")
        .json(&json!({
            "type": "openai",
            "api_key": "sk-secret",
            "model": "gpt-4o"
        }))
        .await
        .assert_status_ok();

    let response = server
        .post("/api/v1/settings/rotate-key")
        .json(&json!({"passphrase": "second-pass"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["rotated"], true);
    assert!(body["peers_acked"].is_null());

    let record = state
        .store
        .get_provider("openai")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.config.api_key.as_deref(), Some("sk-secret"));
}

#[tokio::test]
async fn cron_trigger_requires_valid_schedule() {
    let (_dir, server, _state) = test_state(None).await;

    let invalid = server
        .post("/api/v1/triggers")
        .json(&json!({
            "workflow_id": "wf1",
            "type": "cron",
            "config": {"schedule": "not cron"}
        }))
        .await;
    invalid.assert_status_bad_request();

    let valid = server
        .post("/api/v1/triggers")
        .json(&json!({
            "workflow_id": "wf1",
            "type": "cron",
            "config": {"schedule": "*/5 * * * *"}
        }))
        .await;
    valid.assert_status(axum::http::StatusCode::CREATED);
}

#[tokio::test]
async fn workflow_versions_endpoint() {
    let (_dir, server, _state) = test_state(None).await;

    let created: Value = server
        .post("/api/v1/workflows")
        .json(&json!({
            "name": "wf",
            "graph": {"nodes": [{"id": "in", "type": "http_trigger"}], "edges": []}
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();
    assert_eq!(created["version"], 1);

    server
        .put(&format!("/api/v1/workflows/{id}"))
        .json(&json!({
            "name": "wf renamed",
            "graph": {"nodes": [{"id": "in", "type": "http_trigger"}], "edges": []}
        }))
        .await
        .assert_status_ok();

    let versions: Value = server
        .get(&format!("/api/v1/workflows/{id}/versions"))
        .await
        .json();
    assert_eq!(versions.as_array().unwrap().len(), 2);
}
