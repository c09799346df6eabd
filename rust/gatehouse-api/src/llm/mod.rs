//! Provider abstractions for the gateway dispatch path.
//!
//! The [`ChatProvider`] trait is the single capability the gateway needs
//! from an upstream vendor: a non-streaming `chat` plus an optional
//! streaming variant detected at call time. Drivers translate the service
//! message model into each vendor's wire format and back.
//!
//! # Drivers
//!
//! - [`providers::OpenAiCompatProvider`]: OpenAI, Gemini, and Vertex
//!   (all speak the OpenAI chat-completions shape)
//! - [`providers::AnthropicProvider`]: Anthropic Messages API

pub mod providers;
pub mod registry;
pub mod signatures;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Supported upstream vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI and any OpenAI-compatible API.
    OpenAi,
    /// Anthropic Claude.
    Anthropic,
    /// Google Gemini (generative language API).
    Gemini,
    /// Google Vertex AI.
    Vertex,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Vertex => "vertex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            "vertex" => Some(Self::Vertex),
            _ => None,
        }
    }

    /// Default base URL when the provider config leaves it unset.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::Vertex => "https://aiplatform.googleapis.com/v1beta1/openapi",
        }
    }

    /// Whether the native pass-through proxy serves this vendor.
    pub fn supports_native_proxy(&self) -> bool {
        matches!(self, Self::Anthropic | Self::Gemini)
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    /// OpenAI's newer alias for system.
    Developer,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Message content: a plain string, the raw multi-part array a client
/// sent, or a whole map for clients that use an object form. Parts are
/// kept as loose JSON so OpenAI-compatible upstreams get them verbatim
/// while the Anthropic driver converts block by block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
    Map(serde_json::Map<String, serde_json::Value>),
}

impl MessageContent {
    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| {
                    if p.get("type").and_then(|t| t.as_str()) == Some("text") {
                        p.get("text").and_then(|t| t.as_str())
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join(""),
            Self::Map(map) => map
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Whether any part is something other than plain text.
    pub fn has_non_text_parts(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts
                .iter()
                .any(|p| p.get("type").and_then(|t| t.as_str()) != Some("text")),
            Self::Map(_) => false,
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A tool call on an assistant message.
///
/// `thought_signature` is the Gemini extension field; it is accepted on
/// the way in, cached by tool-call ID, and echoed on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: ToolCallFunction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// Function name and raw JSON arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A message in the service model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A request handed to a driver. `model` is the bare upstream model ID,
/// already stripped of the provider key.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// A complete (non-streaming) response in the service model.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// True when the model stopped on its own, false when it asked for tools.
    pub finished: bool,
}

/// Incremental tool-call fragment on a stream.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub thought_signature: Option<String>,
}

/// One upstream stream chunk in the service model. A chunk may carry any
/// combination of content, inline images, tool-call deltas, a finish
/// reason, and usage; the assembler re-frames it for the client.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    /// Inline images as `data:` URLs, for vendors that interleave them.
    pub images: Vec<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Boxed chunk stream returned by streaming-capable drivers.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The capability the gateway dispatches against.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Non-streaming chat completion.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<LlmResponse>;

    /// Streaming chat. `Ok(None)` means the driver has no streaming
    /// capability and the caller should fall back to [`Self::chat`].
    async fn chat_stream(&self, _req: ChatRequest) -> anyhow::Result<Option<ChunkStream>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_concatenates_text_parts() {
        let content = MessageContent::Parts(vec![
            serde_json::json!({"type": "text", "text": "a"}),
            serde_json::json!({"type": "image_url", "image_url": {"url": "http://x/y.png"}}),
            serde_json::json!({"type": "text", "text": "b"}),
        ]);
        assert_eq!(content.text(), "ab");
        assert!(content.has_non_text_parts());
    }

    #[test]
    fn text_only_parts_are_not_multimodal() {
        let content = MessageContent::Parts(vec![serde_json::json!({"type": "text", "text": "a"})]);
        assert!(!content.has_non_text_parts());
    }

    #[test]
    fn provider_kind_roundtrip() {
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::Vertex,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("groq"), None);
    }

    #[test]
    fn tool_call_deserializes_without_type() {
        let call: ToolCall = serde_json::from_value(serde_json::json!({
            "id": "call_1",
            "function": {"name": "f", "arguments": "{}"}
        }))
        .unwrap();
        assert_eq!(call.call_type, "function");
        assert!(call.thought_signature.is_none());
    }
}
