//! End-to-end gateway tests over an in-process server.
//!
//! Upstream vendors are replaced by a scripted provider registered
//! directly in the registry; everything else - auth, routing, streaming
//! assembly, error shaping - is the real dispatch path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{json, Value};

use gatehouse_api::config::{AppConfig, DeclaredToken};
use gatehouse_api::domain::ProviderConfig;
use gatehouse_api::llm::registry::ProviderHandle;
use gatehouse_api::llm::{
    ChatProvider, ChatRequest, ChunkStream, LlmResponse, ProviderKind, StreamChunk, ToolCall,
    ToolCallFunction, Usage,
};
use gatehouse_api::server::{create_app, routes};
use gatehouse_api::AppState;

/// A provider that replays a scripted response and stream.
struct ScriptedProvider {
    response: LlmResponse,
    chunks: Option<Vec<StreamChunk>>,
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(&self, _req: ChatRequest) -> anyhow::Result<LlmResponse> {
        Ok(self.response.clone())
    }

    async fn chat_stream(&self, _req: ChatRequest) -> anyhow::Result<Option<ChunkStream>> {
        match &self.chunks {
            Some(chunks) => {
                let items: Vec<anyhow::Result<StreamChunk>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(Some(Box::pin(futures::stream::iter(items))))
            }
            None => Ok(None),
        }
    }
}

fn scripted_handle(response: LlmResponse, chunks: Option<Vec<StreamChunk>>) -> ProviderHandle {
    let config = ProviderConfig {
        kind: ProviderKind::OpenAi,
        api_key: None,
        base_url: None,
        model: "gpt-4o".into(),
        models: vec![],
        extra_headers: HashMap::new(),
        proxy: None,
    };
    ProviderHandle {
        provider: Arc::new(ScriptedProvider { response, chunks }),
        kind: ProviderKind::OpenAi,
        default_model: "gpt-4o".into(),
        models: vec![],
        config,
    }
}

async fn test_state(declared: Vec<DeclaredToken>) -> (tempfile::TempDir, TestServer, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.db_path = dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();
    config.auth.tokens = declared;

    let (_, state) = create_app(config).await.unwrap();
    let app = routes(state.clone(), "/");
    let server = TestServer::new(app).unwrap();
    (dir, server, state)
}

fn token(raw: &str) -> DeclaredToken {
    DeclaredToken {
        token: raw.to_string(),
        allowed_providers: None,
        allowed_models: None,
        allowed_webhooks: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn missing_bearer_is_401_with_error_envelope() {
    let (_dir, server, _state) = test_state(vec![token("at_test")]).await;

    let response = server
        .post("/gateway/v1/chat/completions")
        .json(&json!({"model": "openai/gpt-4o", "messages": []}))
        .await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn model_without_slash_is_400() {
    let (_dir, server, _state) = test_state(vec![token("at_test")]).await;

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("provider/model"));
}

#[tokio::test]
async fn unknown_provider_is_404() {
    let (_dir, server, _state) = test_state(vec![token("at_test")]).await;

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({"model": "ghost/gpt-4o", "messages": []}))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn scope_denial_is_403_naming_the_model() {
    let scoped = DeclaredToken {
        token: "at_scoped".to_string(),
        allowed_models: Some(vec!["openai/gpt-4o".to_string()]),
        allowed_providers: None,
        allowed_webhooks: None,
        expires_at: None,
    };
    let (_dir, server, _state) = test_state(vec![scoped]).await;

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_scoped")
        .json(&json!({"model": "anthropic/claude-haiku-4-5", "messages": []}))
        .await;

    response.assert_status_forbidden();
    let body: Value = response.json();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("anthropic/claude-haiku-4-5"));
}

#[tokio::test]
async fn simple_chat_roundtrip() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state.registry.replace(
        "mock",
        scripted_handle(
            LlmResponse {
                content: Some("hello".into()),
                tool_calls: vec![],
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                }),
                finished: true,
            },
            None,
        ),
    );

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({
            "model": "mock/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "mock/gpt-4o");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 3);
}

#[tokio::test]
async fn tool_call_response_has_tool_calls_finish_reason() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state.registry.replace(
        "mock",
        scripted_handle(
            LlmResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    call_type: "function".into(),
                    function: ToolCallFunction {
                        name: "f".into(),
                        arguments: "{\"x\":1}".into(),
                    },
                    thought_signature: Some("SIG".into()),
                }],
                usage: None,
                finished: false,
            },
            None,
        ),
    );

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({
            "model": "mock/gpt-4o",
            "messages": [{"role": "user", "content": "use tool"}]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    let call = &body["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["id"], "call_1");
    assert_eq!(call["type"], "function");
    assert_eq!(call["thought_signature"], "SIG");
}

/// Parse SSE body lines into JSON chunks plus the terminator.
fn parse_sse(body: &str) -> (Vec<Value>, bool) {
    let mut chunks = Vec::new();
    let mut done = false;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data.trim() == "[DONE]" {
            done = true;
        } else if let Ok(value) = serde_json::from_str::<Value>(data) {
            chunks.push(value);
        }
    }
    (chunks, done)
}

#[tokio::test]
async fn streaming_with_usage_follows_the_reference_framing() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state.registry.replace(
        "mock",
        scripted_handle(
            LlmResponse::default(),
            Some(vec![
                StreamChunk {
                    content: Some("A".into()),
                    ..StreamChunk::default()
                },
                StreamChunk {
                    content: Some("B".into()),
                    finish_reason: Some("stop".into()),
                    ..StreamChunk::default()
                },
                StreamChunk {
                    usage: Some(Usage {
                        prompt_tokens: 3,
                        completion_tokens: 2,
                        total_tokens: 5,
                    }),
                    ..StreamChunk::default()
                },
            ]),
        ),
    );

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({
            "model": "mock/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "stream_options": {"include_usage": true}
        }))
        .await;

    response.assert_status_ok();
    let (chunks, done) = parse_sse(&response.text());
    assert!(done);
    assert_eq!(chunks.len(), 5);

    // role, A, B without finish, finish only, usage with empty choices
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "A");
    assert_eq!(chunks[2]["choices"][0]["delta"]["content"], "B");
    assert!(chunks[2]["choices"][0]["finish_reason"].is_null());
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert_eq!(chunks[4]["choices"], json!([]));
    assert_eq!(chunks[4]["usage"]["total_tokens"], 5);
}

#[tokio::test]
async fn fake_stream_when_provider_cannot_stream() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state.registry.replace(
        "mock",
        scripted_handle(
            LlmResponse {
                content: Some("whole answer".into()),
                tool_calls: vec![],
                usage: None,
                finished: true,
            },
            None,
        ),
    );

    let response = server
        .post("/gateway/v1/chat/completions")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({
            "model": "mock/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .await;

    response.assert_status_ok();
    let (chunks, done) = parse_sse(&response.text());
    assert!(done);
    // role, content, finish
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "whole answer");
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn models_listing_is_scope_filtered() {
    let scoped = DeclaredToken {
        token: "at_scoped".to_string(),
        allowed_providers: Some(vec!["mock".to_string()]),
        allowed_models: None,
        allowed_webhooks: None,
        expires_at: None,
    };
    let (_dir, server, state) = test_state(vec![token("at_test"), scoped]).await;
    state
        .registry
        .replace("mock", scripted_handle(LlmResponse::default(), None));
    state
        .registry
        .replace("other", scripted_handle(LlmResponse::default(), None));

    let all: Value = server
        .get("/gateway/v1/models")
        .add_header("authorization", "Bearer at_test")
        .await
        .json();
    assert_eq!(all["object"], "list");
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let filtered: Value = server
        .get("/gateway/v1/models")
        .add_header("authorization", "Bearer at_scoped")
        .await
        .json();
    let data = filtered["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "mock/gpt-4o");
}

#[tokio::test]
async fn native_proxy_rejects_non_native_providers() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state
        .registry
        .replace("mock", scripted_handle(LlmResponse::default(), None));

    let response = server
        .post("/gateway/v1/native/mock/v1/models")
        .add_header("authorization", "Bearer at_test")
        .json(&json!({}))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn cancel_unknown_run_is_404() {
    let (_dir, server, _state) = test_state(vec![token("at_test")]).await;

    let response = server.post("/api/v1/runs/run_missing/cancel").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn admin_chat_needs_no_bearer() {
    let (_dir, server, state) = test_state(vec![token("at_test")]).await;
    state.registry.replace(
        "mock",
        scripted_handle(
            LlmResponse {
                content: Some("admin".into()),
                tool_calls: vec![],
                usage: None,
                finished: true,
            },
            None,
        ),
    );

    let response = server
        .post("/api/v1/chat/completions")
        .json(&json!({
            "model": "mock/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "admin");
}
