//! OpenAI-compatible driver.
//!
//! Serves `openai`, `gemini`, and `vertex` providers - all three accept the
//! OpenAI chat-completions wire shape. Messages are rebuilt as generic JSON
//! maps so every recognized field survives the trip, and multi-part content
//! with non-text blocks passes through verbatim. Cached thought signatures
//! are reinjected into outgoing tool calls when the client stripped them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::ProviderConfig;
use crate::llm::signatures::SignatureCache;
use crate::llm::{
    ChatProvider, ChatRequest, ChunkStream, LlmResponse, Message, MessageContent, ProviderKind,
    StreamChunk, ToolCall, ToolCallDelta, ToolCallFunction, Usage,
};

use super::build_client;

/// Driver for OpenAI and OpenAI-compatible endpoints.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    client: Client,
    signatures: Arc<SignatureCache>,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("kind", &self.config.kind)
            .field("model", &self.config.model)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig, signatures: Arc<SignatureCache>) -> anyhow::Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client,
            signatures,
        })
    }

    fn api_url(&self) -> String {
        let base = self.config.base_url_or_default();
        match self.config.kind {
            ProviderKind::Gemini => format!("{base}/v1beta/openai/chat/completions"),
            ProviderKind::Vertex => format!("{base}/chat/completions"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Rebuild messages as generic maps, preserving every recognized field.
    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut obj = json!({ "role": msg.role.as_str() });

                match &msg.content {
                    MessageContent::Text(text) => {
                        obj["content"] = Value::String(text.clone());
                    }
                    MessageContent::Parts(parts) => {
                        if msg.content.has_non_text_parts() {
                            obj["content"] = Value::Array(parts.clone());
                        } else {
                            obj["content"] = Value::String(msg.content.text());
                        }
                    }
                    MessageContent::Map(map) => {
                        obj["content"] = Value::Object(map.clone());
                    }
                }

                if let Some(ref tool_call_id) = msg.tool_call_id {
                    obj["tool_call_id"] = Value::String(tool_call_id.clone());
                }
                if let Some(ref name) = msg.name {
                    obj["name"] = Value::String(name.clone());
                }
                if let Some(ref tool_calls) = msg.tool_calls {
                    obj["tool_calls"] = Value::Array(
                        tool_calls.iter().map(|c| self.convert_tool_call(c)).collect(),
                    );
                }

                obj
            })
            .collect()
    }

    fn convert_tool_call(&self, call: &ToolCall) -> Value {
        let mut obj = json!({
            "id": call.id,
            "type": call.call_type,
            "function": {
                "name": call.function.name,
                "arguments": call.function.arguments,
            },
        });
        let signature = call
            .thought_signature
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.signatures.get(&call.id));
        if let Some(sig) = signature {
            obj["thought_signature"] = Value::String(sig);
        }
        obj
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": self.convert_messages(&req.messages),
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.clone());
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = json!(top_p);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(self.api_url()).json(body);
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        for (name, value) in &self.config.extra_headers {
            request = request.header(name, value);
        }
        request
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<LlmResponse> {
        let body = self.build_body(&req, false);
        let response = self.request(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("upstream error ({status}): {text}");
        }

        let parsed: WireResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("upstream returned no choices"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                if let Some(ref sig) = c.thought_signature {
                    self.signatures.put(&c.id, sig);
                }
                ToolCall {
                    id: c.id,
                    call_type: c.call_type.unwrap_or_else(|| "function".to_string()),
                    function: ToolCallFunction {
                        name: c.function.name.unwrap_or_default(),
                        arguments: c.function.arguments.unwrap_or_default(),
                    },
                    thought_signature: c.thought_signature,
                }
            })
            .collect();

        let finished = choice.finish_reason.as_deref() != Some("tool_calls") && tool_calls.is_empty();

        Ok(LlmResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            usage: parsed.usage.map(Usage::from),
            finished,
        })
    }

    async fn chat_stream(&self, req: ChatRequest) -> anyhow::Result<Option<ChunkStream>> {
        let body = self.build_body(&req, true);
        let response = self.request(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("upstream error ({status}): {text}");
        }

        let stream = response.bytes_stream();

        let chunk_stream = async_stream::stream! {
            let mut buffer = String::new();

            futures::pin_mut!(stream);

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(anyhow::anyhow!("stream error: {e}"));
                        break;
                    }
                };

                let Ok(text) = std::str::from_utf8(&bytes) else {
                    continue;
                };
                buffer.push_str(text);

                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in frame.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim() == "[DONE]" {
                            return;
                        }
                        match serde_json::from_str::<WireStreamChunk>(data) {
                            Ok(wire) => {
                                if let Some(chunk) = wire.into_chunk() {
                                    yield Ok(chunk);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to parse upstream chunk");
                            }
                        }
                    }
                }
            }
        };

        Ok(Some(Box::pin(chunk_stream)))
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: Option<String>,
    function: WireFunction,
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    /// Either a scalar string or an array of typed parts.
    content: Option<Value>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunction>,
    thought_signature: Option<String>,
}

impl WireStreamChunk {
    /// Flatten the wire chunk into the service model. Signature caching
    /// happens downstream in the assembler, which tracks tool-call IDs.
    fn into_chunk(self) -> Option<StreamChunk> {
        let mut chunk = StreamChunk {
            usage: self.usage.map(Usage::from),
            ..StreamChunk::default()
        };

        if let Some(choice) = self.choices.into_iter().next() {
            chunk.finish_reason = choice.finish_reason;

            if let Some(delta) = choice.delta {
                match delta.content {
                    Some(Value::String(text)) if !text.is_empty() => {
                        chunk.content = Some(text);
                    }
                    Some(Value::Array(parts)) => {
                        let mut text = String::new();
                        for part in &parts {
                            match part.get("type").and_then(|t| t.as_str()) {
                                Some("text") => {
                                    if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                                        text.push_str(t);
                                    }
                                }
                                Some("image_url") => {
                                    if let Some(url) = part
                                        .pointer("/image_url/url")
                                        .and_then(|u| u.as_str())
                                    {
                                        chunk.images.push(url.to_string());
                                    }
                                }
                                _ => {}
                            }
                        }
                        if !text.is_empty() {
                            chunk.content = Some(text);
                        }
                    }
                    _ => {}
                }

                for call in delta.tool_calls.unwrap_or_default() {
                    let (name, arguments) = match call.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    chunk.tool_calls.push(ToolCallDelta {
                        index: call.index,
                        id: call.id,
                        name,
                        arguments,
                        thought_signature: call.thought_signature,
                    });
                }
            }
        }

        if chunk.content.is_none()
            && chunk.images.is_empty()
            && chunk.tool_calls.is_empty()
            && chunk.finish_reason.is_none()
            && chunk.usage.is_none()
        {
            return None;
        }
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(kind: ProviderKind) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            ProviderConfig {
                kind,
                api_key: Some("sk-test".into()),
                base_url: None,
                model: "m".into(),
                models: vec![],
                extra_headers: HashMap::new(),
                proxy: None,
            },
            Arc::new(SignatureCache::default()),
        )
        .unwrap()
    }

    #[test]
    fn api_url_per_kind() {
        assert_eq!(
            provider(ProviderKind::OpenAi).api_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider(ProviderKind::Gemini).api_url(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
    }

    #[test]
    fn multimodal_content_passes_through() {
        let p = provider(ProviderKind::OpenAi);
        let parts = vec![
            json!({"type": "text", "text": "look"}),
            json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,eA=="}}),
        ];
        let messages = vec![Message {
            role: crate::llm::MessageRole::User,
            content: MessageContent::Parts(parts.clone()),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }];
        let converted = p.convert_messages(&messages);
        assert_eq!(converted[0]["content"], Value::Array(parts));
    }

    #[test]
    fn text_only_parts_collapse_to_string() {
        let p = provider(ProviderKind::OpenAi);
        let messages = vec![Message {
            role: crate::llm::MessageRole::User,
            content: MessageContent::Parts(vec![
                json!({"type": "text", "text": "a"}),
                json!({"type": "text", "text": "b"}),
            ]),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }];
        let converted = p.convert_messages(&messages);
        assert_eq!(converted[0]["content"], json!("ab"));
    }

    #[test]
    fn signature_reinjected_from_cache() {
        let signatures = Arc::new(SignatureCache::default());
        signatures.put("call_1", "S");
        let p = OpenAiCompatProvider::new(
            ProviderConfig {
                kind: ProviderKind::Gemini,
                api_key: None,
                base_url: None,
                model: "m".into(),
                models: vec![],
                extra_headers: HashMap::new(),
                proxy: None,
            },
            signatures,
        )
        .unwrap();

        let converted = p.convert_tool_call(&ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: ToolCallFunction {
                name: "f".into(),
                arguments: "{}".into(),
            },
            thought_signature: Some(String::new()),
        });
        assert_eq!(converted["thought_signature"], json!("S"));
    }

    #[test]
    fn stream_chunk_flattens_tool_calls() {
        let wire: WireStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_9",
                        "function": {"name": "f", "arguments": "{\"x\""},
                        "thought_signature": "SIG"
                    }]
                }
            }]
        }))
        .unwrap();
        let chunk = wire.into_chunk().unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(chunk.tool_calls[0].thought_signature.as_deref(), Some("SIG"));
    }

    #[test]
    fn stream_chunk_with_image_parts() {
        let wire: WireStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {
                    "content": [
                        {"type": "text", "text": "here"},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,eA=="}}
                    ]
                }
            }]
        }))
        .unwrap();
        let chunk = wire.into_chunk().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("here"));
        assert_eq!(chunk.images.len(), 1);
    }

    #[test]
    fn empty_chunk_is_dropped() {
        let wire: WireStreamChunk =
            serde_json::from_value(json!({"choices": [{"delta": {}}]})).unwrap();
        assert!(wire.into_chunk().is_none());
    }
}
