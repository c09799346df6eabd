//! OpenAI-compatible chat completions dispatch.
//!
//! One handler serves both the bearer-authenticated gateway route and the
//! forward-auth-protected admin route; only the auth result differs.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::gateway::auth::AuthResult;
use crate::gateway::route::resolve_model;
use crate::gateway::streaming::{fake_stream, sse_response, StreamContext};
use crate::llm::{ChatRequest, LlmResponse, Message, MessageContent, MessageRole, ToolCall};
use crate::AppState;

/// Wire shape of an incoming chat completions request.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionsBody {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// Incoming message with content in any of its client shapes.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl From<IncomingMessage> for Message {
    fn from(msg: IncomingMessage) -> Self {
        let role = match msg.role.as_str() {
            "system" => MessageRole::System,
            "developer" => MessageRole::Developer,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        };
        Message {
            role,
            content: msg.content.unwrap_or_default(),
            tool_call_id: msg.tool_call_id,
            name: msg.name,
            tool_calls: msg.tool_calls,
        }
    }
}

/// `POST /gateway/v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let auth = state.authenticator.authenticate(&headers).await?;
    dispatch(&state, &auth, &body).await
}

/// `POST /api/v1/chat/completions` - forward-auth protected upstream, so
/// the gateway treats it as unrestricted.
pub async fn admin_chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(&state, &AuthResult::Unrestricted, &body).await
}

/// The shared dispatch path: parse, route, call, shape the response.
pub async fn dispatch(
    state: &AppState,
    auth: &AuthResult,
    body: &[u8],
) -> Result<Response, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body is required".to_string()));
    }
    let parsed: ChatCompletionsBody = serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))?;

    let (provider_key, model_id, handle) = resolve_model(&state.registry, auth, &parsed.model)?;
    let routed_model = format!("{provider_key}/{model_id}");

    let request = ChatRequest {
        model: model_id,
        messages: parsed.messages.into_iter().map(Into::into).collect(),
        tools: parsed.tools,
        temperature: parsed.temperature,
        max_tokens: parsed.max_tokens,
        top_p: parsed.top_p,
    };

    if parsed.stream {
        let ctx = StreamContext {
            id: format!("chatcmpl-{}", ulid::Ulid::new()),
            created: Utc::now().timestamp(),
            model: routed_model,
            include_usage: parsed
                .stream_options
                .map(|o| o.include_usage)
                .unwrap_or(false),
        };

        // Capability detection at call time, with the non-streaming
        // fallback synthesized into a short stream.
        let upstream = match handle.provider.chat_stream(request.clone()).await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                let response = handle
                    .provider
                    .chat(request)
                    .await
                    .map_err(|err| ApiError::Upstream(err.to_string()))?;
                fake_stream(response, &state.signatures)
            }
            Err(err) => return Err(ApiError::Upstream(err.to_string())),
        };

        return Ok(sse_response(ctx, upstream, state.signatures.clone()).into_response());
    }

    let response = handle
        .provider
        .chat(request)
        .await
        .map_err(|err| ApiError::Upstream(err.to_string()))?;

    Ok(Json(completion_json(&routed_model, &response, state)).into_response())
}

/// Shape an [`LlmResponse`] as an OpenAI `chat.completion`.
fn completion_json(routed_model: &str, response: &LlmResponse, state: &AppState) -> Value {
    let finish_reason = if response.finished { "stop" } else { "tool_calls" };

    let mut message = json!({ "role": "assistant" });
    message["content"] = match response.content {
        Some(ref content) => json!(content),
        None => Value::Null,
    };

    if !response.tool_calls.is_empty() {
        let calls: Vec<Value> = response
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| tool_call_json(index, call, state))
            .collect();
        message["tool_calls"] = Value::Array(calls);
    }

    let mut body = json!({
        "id": format!("chatcmpl-{}", ulid::Ulid::new()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": routed_model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    });
    if let Some(usage) = response.usage {
        body["usage"] = json!({
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        });
    }
    body
}

fn tool_call_json(index: usize, call: &ToolCall, state: &AppState) -> Value {
    let mut entry = json!({
        "index": index,
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.function.name,
            "arguments": call.function.arguments,
        },
    });
    let signature = call
        .thought_signature
        .clone()
        .or_else(|| state.signatures.get(&call.id));
    if let Some(signature) = signature {
        entry["thought_signature"] = json!(signature);
    }
    entry
}
