//! Anthropic Messages API driver.
//!
//! Anthropic differs from the OpenAI shape in three ways the converter has
//! to absorb: the system prompt travels out-of-band, tool results are user
//! messages of `tool_result` blocks (and all results of one turn must share
//! a single user message), and assistant tool calls become `tool_use`
//! content blocks after any text.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::ProviderConfig;
use crate::llm::{
    ChatProvider, ChatRequest, ChunkStream, LlmResponse, Message, MessageContent, MessageRole,
    StreamChunk, ToolCall, ToolCallDelta, ToolCallFunction, Usage,
};

use super::{build_client, parse_data_uri};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Driver for the Anthropic Messages API.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.config.model)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url_or_default())
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> anyhow::Result<Value> {
        let (system, messages) = convert_messages(&req.messages)?;

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(convert_tools(&req.tools));
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = json!(top_p);
        }
        if stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.api_url())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body);
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("x-api-key", api_key);
        }
        for (name, value) in &self.config.extra_headers {
            request = request.header(name, value);
        }
        request
    }
}

/// Map Anthropic stop reasons onto OpenAI finish reasons.
fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

/// Convert the service conversation into (system, messages).
///
/// Consecutive tool results coalesce into one user message; Anthropic
/// requires every result of a turn in the same message.
fn convert_messages(messages: &[Message]) -> anyhow::Result<(Option<String>, Vec<Value>)> {
    let mut system_texts: Vec<String> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System | MessageRole::Developer => {
                let text = msg.content.text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            MessageRole::User => {
                out.push(json!({
                    "role": "user",
                    "content": convert_user_content(&msg.content),
                }));
            }
            MessageRole::Assistant => {
                out.push(convert_assistant_message(msg)?);
            }
            MessageRole::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content.text(),
                });
                match out.last_mut() {
                    Some(last) if is_tool_result_message(last) => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => {
                        out.push(json!({ "role": "user", "content": [block] }));
                    }
                }
            }
        }
    }

    let system = if system_texts.is_empty() {
        None
    } else {
        Some(system_texts.join("\n"))
    };
    Ok((system, out))
}

fn is_tool_result_message(msg: &Value) -> bool {
    msg["role"] == "user"
        && msg["content"]
            .as_array()
            .is_some_and(|blocks| {
                blocks
                    .iter()
                    .all(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
            })
}

fn convert_assistant_message(msg: &Message) -> anyhow::Result<Value> {
    let text = msg.content.text();
    let tool_calls = msg.tool_calls.as_deref().unwrap_or_default();

    if tool_calls.is_empty() {
        return Ok(json!({ "role": "assistant", "content": text }));
    }

    // Text first, then tool_use blocks.
    let mut blocks: Vec<Value> = Vec::new();
    if !text.is_empty() {
        blocks.push(json!({ "type": "text", "text": text }));
    }
    for call in tool_calls {
        blocks.push(convert_tool_use(call)?);
    }
    Ok(json!({ "role": "assistant", "content": blocks }))
}

fn convert_tool_use(call: &ToolCall) -> anyhow::Result<Value> {
    let input: Value = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()))
    };
    Ok(json!({
        "type": "tool_use",
        "id": call.id,
        "name": call.function.name,
        "input": input,
    }))
}

/// Convert user content, translating each non-text part into the matching
/// Anthropic block with a base64 source for `data:` URIs and a url source
/// otherwise.
fn convert_user_content(content: &MessageContent) -> Value {
    let parts = match content {
        MessageContent::Text(text) => return Value::String(text.clone()),
        MessageContent::Parts(parts) => parts,
        MessageContent::Map(_) => return Value::String(content.text()),
    };
    if !content.has_non_text_parts() {
        return Value::String(content.text());
    }

    let blocks: Vec<Value> = parts
        .iter()
        .filter_map(|part| match part.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                let text = part.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                Some(json!({ "type": "text", "text": text }))
            }
            Some("image_url") => part
                .pointer("/image_url/url")
                .and_then(|u| u.as_str())
                .map(|url| sourced_block("image", url)),
            Some("file") => part
                .pointer("/file/file_data")
                .and_then(|u| u.as_str())
                .map(|url| sourced_block("document", url)),
            Some("input_audio") => {
                let data = part.pointer("/input_audio/data").and_then(|d| d.as_str())?;
                let format = part
                    .pointer("/input_audio/format")
                    .and_then(|f| f.as_str())
                    .unwrap_or("wav");
                Some(json!({
                    "type": "audio",
                    "source": {
                        "type": "base64",
                        "media_type": format!("audio/{format}"),
                        "data": data,
                    },
                }))
            }
            Some("video_url") => part
                .pointer("/video_url/url")
                .and_then(|u| u.as_str())
                .map(|url| sourced_block("video", url)),
            _ => None,
        })
        .collect();

    Value::Array(blocks)
}

fn sourced_block(block_type: &str, url: &str) -> Value {
    let source = match parse_data_uri(url) {
        Some((media_type, data)) => json!({
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }),
        None => json!({ "type": "url", "url": url }),
    };
    json!({ "type": block_type, "source": source })
}

/// Convert OpenAI function-tool definitions into Anthropic tools.
fn convert_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(json!({
                "name": function.get("name")?,
                "description": function.get("description").cloned().unwrap_or(json!("")),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or(json!({"type": "object", "properties": {}})),
            }))
        })
        .collect()
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<LlmResponse> {
        let body = self.build_body(&req, false)?;
        let response = self.request(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("upstream error ({status}): {text}");
        }

        let parsed: WireMessage = response.json().await?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in parsed.content {
            match block {
                WireBlock::Text { text } => content.push_str(&text),
                WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    call_type: "function".to_string(),
                    function: ToolCallFunction {
                        name,
                        arguments: serde_json::to_string(&input)?,
                    },
                    thought_signature: None,
                }),
                WireBlock::Other => {}
            }
        }

        let finished = parsed.stop_reason.as_deref() != Some("tool_use");

        Ok(LlmResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
            usage: parsed.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens.unwrap_or(0),
                total_tokens: u.input_tokens + u.output_tokens.unwrap_or(0),
            }),
            finished,
        })
    }

    async fn chat_stream(&self, req: ChatRequest) -> anyhow::Result<Option<ChunkStream>> {
        let body = self.build_body(&req, true)?;
        let response = self.request(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("upstream error ({status}): {text}");
        }

        let stream = response.bytes_stream();

        let chunk_stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;
            // Running tool index: Anthropic numbers content blocks, the
            // OpenAI shape numbers tool calls.
            let mut tool_index: Option<usize> = None;

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
                        let event: WireEvent = match serde_json::from_str(data) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to parse anthropic event");
                                continue;
                            }
                        };

                        match event.event_type.as_str() {
                            "message_start" => {
                                if let Some(usage) =
                                    event.message.and_then(|m| m.usage)
                                {
                                    input_tokens = usage.input_tokens;
                                }
                            }
                            "content_block_start" => {
                                if let Some(block) = event.content_block {
                                    if block.block_type == "tool_use" {
                                        let index =
                                            tool_index.map_or(0, |i| i + 1);
                                        tool_index = Some(index);
                                        yield Ok(StreamChunk {
                                            tool_calls: vec![ToolCallDelta {
                                                index,
                                                id: block.id,
                                                name: block.name,
                                                arguments: None,
                                                thought_signature: None,
                                            }],
                                            ..StreamChunk::default()
                                        });
                                    }
                                }
                            }
                            "content_block_delta" => {
                                if let Some(delta) = event.delta {
                                    if let Some(text) = delta.text {
                                        yield Ok(StreamChunk {
                                            content: Some(text),
                                            ..StreamChunk::default()
                                        });
                                    } else if let Some(partial) = delta.partial_json {
                                        yield Ok(StreamChunk {
                                            tool_calls: vec![ToolCallDelta {
                                                index: tool_index.unwrap_or(0),
                                                arguments: Some(partial),
                                                ..ToolCallDelta::default()
                                            }],
                                            ..StreamChunk::default()
                                        });
                                    }
                                }
                            }
                            "message_delta" => {
                                if let Some(usage) = event.usage {
                                    output_tokens = usage.output_tokens.unwrap_or(0);
                                }
                                if let Some(reason) =
                                    event.delta.and_then(|d| d.stop_reason)
                                {
                                    yield Ok(StreamChunk {
                                        finish_reason: Some(
                                            map_stop_reason(&reason).to_string(),
                                        ),
                                        ..StreamChunk::default()
                                    });
                                }
                            }
                            "message_stop" => {
                                yield Ok(StreamChunk {
                                    usage: Some(Usage {
                                        prompt_tokens: input_tokens,
                                        completion_tokens: output_tokens,
                                        total_tokens: input_tokens + output_tokens,
                                    }),
                                    ..StreamChunk::default()
                                });
                                return;
                            }
                            "error" => {
                                let message = event
                                    .error
                                    .map(|e| e.message)
                                    .unwrap_or_else(|| "unknown upstream error".to_string());
                                yield Err(anyhow::anyhow!(message));
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        };

        Ok(Some(Box::pin(chunk_stream)))
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    event_type: String,
    message: Option<WireEventMessage>,
    content_block: Option<WireContentBlock>,
    delta: Option<WireEventDelta>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireEventMessage {
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEventDelta {
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}
