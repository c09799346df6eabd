//! SSE streaming assembler.
//!
//! Re-frames provider chunks as OpenAI-compatible `chat.completion.chunk`
//! events. The outgoing stream keeps a strict shape many clients depend on:
//!
//! 1. the first chunk carries only `delta.role = "assistant"`;
//! 2. a chunk carrying both data and a finish reason is split, data first;
//! 3. usage is never emitted inline - it trails as a `choices: []` chunk,
//!    and only when the client asked via `stream_options.include_usage`;
//! 4. the stream ends with the literal `data: [DONE]`;
//! 5. tool-call deltas get ascending indexes, and signatures are cached by
//!    tool-call ID before going downstream;
//! 6. `delta.content` is a scalar unless inline images force a parts array.
//!
//! Providers without streaming get a synthesized stream of at most five
//! chunks from their non-streaming response.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::llm::signatures::SignatureCache;
use crate::llm::{ChunkStream, LlmResponse, StreamChunk, ToolCallDelta, Usage};

/// Identity of the response being streamed.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// `chatcmpl-<id>` shared by every chunk.
    pub id: String,
    pub created: i64,
    /// Routed model, echoed as `provider/model`.
    pub model: String,
    pub include_usage: bool,
}

/// One outgoing SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Chunk(Value),
    Done,
}

impl SseFrame {
    fn into_event(self) -> Event {
        match self {
            Self::Chunk(value) => Event::default().data(value.to_string()),
            Self::Done => Event::default().data("[DONE]"),
        }
    }
}

/// Assemble provider chunks into OpenAI-shaped SSE frames.
pub fn assemble(
    ctx: StreamContext,
    upstream: ChunkStream,
    signatures: Arc<SignatureCache>,
) -> impl Stream<Item = SseFrame> {
    async_stream::stream! {
        yield SseFrame::Chunk(chunk_json(&ctx, json!({"role": "assistant"}), None));

        let mut captured_usage: Option<Usage> = None;
        let mut tool_indexes: HashMap<usize, usize> = HashMap::new();
        let mut tool_ids: HashMap<usize, String> = HashMap::new();
        let mut errored = false;

        let mut upstream = upstream;
        while let Some(item) = upstream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    // A single final chunk carrying the error text, then done.
                    yield SseFrame::Chunk(chunk_json(
                        &ctx,
                        json!({"content": err.to_string()}),
                        Some("stop"),
                    ));
                    errored = true;
                    break;
                }
            };

            if let Some(usage) = chunk.usage {
                captured_usage = Some(usage);
            }

            let delta = build_delta(&chunk, &mut tool_indexes, &mut tool_ids, &signatures);
            match (delta, chunk.finish_reason) {
                (Some(delta), Some(reason)) => {
                    // Split: data first, then the finish reason alone.
                    yield SseFrame::Chunk(chunk_json(&ctx, delta, None));
                    yield SseFrame::Chunk(chunk_json(&ctx, json!({}), Some(reason.as_str())));
                }
                (Some(delta), None) => {
                    yield SseFrame::Chunk(chunk_json(&ctx, delta, None));
                }
                (None, Some(reason)) => {
                    yield SseFrame::Chunk(chunk_json(&ctx, json!({}), Some(reason.as_str())));
                }
                (None, None) => {}
            }
        }

        if !errored && ctx.include_usage {
            if let Some(usage) = captured_usage {
                yield SseFrame::Chunk(usage_json(&ctx, usage));
            }
        }

        yield SseFrame::Done;
    }
}

/// Synthesize a chunk stream from a non-streaming response. Together with
/// the assembler's role and usage chunks this yields at most five.
pub fn fake_stream(response: LlmResponse, signatures: &SignatureCache) -> ChunkStream {
    let mut chunks: Vec<anyhow::Result<StreamChunk>> = Vec::new();

    if let Some(content) = response.content {
        chunks.push(Ok(StreamChunk {
            content: Some(content),
            ..StreamChunk::default()
        }));
    }

    if !response.tool_calls.is_empty() {
        let deltas = response
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| ToolCallDelta {
                index,
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                arguments: Some(call.function.arguments.clone()),
                thought_signature: call
                    .thought_signature
                    .clone()
                    .or_else(|| signatures.get(&call.id)),
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            tool_calls: deltas,
            ..StreamChunk::default()
        }));
    }

    let finish = if response.finished { "stop" } else { "tool_calls" };
    chunks.push(Ok(StreamChunk {
        finish_reason: Some(finish.to_string()),
        ..StreamChunk::default()
    }));

    if let Some(usage) = response.usage {
        chunks.push(Ok(StreamChunk {
            usage: Some(usage),
            ..StreamChunk::default()
        }));
    }

    Box::pin(futures::stream::iter(chunks))
}

/// Wrap assembled frames as an axum SSE response.
pub fn sse_response(
    ctx: StreamContext,
    upstream: ChunkStream,
    signatures: Arc<SignatureCache>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = assemble(ctx, upstream, signatures).map(|frame| Ok(frame.into_event()));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Build the delta object for one chunk, or `None` when it carries no data.
fn build_delta(
    chunk: &StreamChunk,
    tool_indexes: &mut HashMap<usize, usize>,
    tool_ids: &mut HashMap<usize, String>,
    signatures: &SignatureCache,
) -> Option<Value> {
    let mut delta = serde_json::Map::new();

    if chunk.images.is_empty() {
        if let Some(ref content) = chunk.content {
            delta.insert("content".to_string(), json!(content));
        }
    } else {
        // Inline images force the parts-array form.
        let mut parts = Vec::new();
        if let Some(ref content) = chunk.content {
            parts.push(json!({"type": "text", "text": content}));
        }
        for url in &chunk.images {
            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }
        delta.insert("content".to_string(), Value::Array(parts));
    }

    if !chunk.tool_calls.is_empty() {
        let calls: Vec<Value> = chunk
            .tool_calls
            .iter()
            .map(|call| {
                let next = tool_indexes.len();
                let index = *tool_indexes.entry(call.index).or_insert(next);

                if let Some(ref id) = call.id {
                    tool_ids.insert(call.index, id.clone());
                }
                if let Some(ref signature) = call.thought_signature {
                    if let Some(id) = tool_ids.get(&call.index) {
                        signatures.put(id, signature);
                    }
                }

                let mut entry = json!({"index": index});
                if let Some(ref id) = call.id {
                    entry["id"] = json!(id);
                    entry["type"] = json!("function");
                }
                let mut function = serde_json::Map::new();
                if let Some(ref name) = call.name {
                    function.insert("name".to_string(), json!(name));
                }
                if let Some(ref arguments) = call.arguments {
                    function.insert("arguments".to_string(), json!(arguments));
                }
                if !function.is_empty() {
                    entry["function"] = Value::Object(function);
                }
                if let Some(ref signature) = call.thought_signature {
                    entry["thought_signature"] = json!(signature);
                }
                entry
            })
            .collect();
        delta.insert("tool_calls".to_string(), Value::Array(calls));
    }

    if delta.is_empty() {
        None
    } else {
        Some(Value::Object(delta))
    }
}

fn chunk_json(ctx: &StreamContext, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": ctx.id,
        "object": "chat.completion.chunk",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

fn usage_json(ctx: &StreamContext, usage: Usage) -> Value {
    json!({
        "id": ctx.id,
        "object": "chat.completion.chunk",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [],
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        },
    })
}
