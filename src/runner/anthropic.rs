//! Messages-style SSE adapter
//!
//! Wire grammar, in stream order:
//!
//! ```text
//! message_start        -> usage (input tokens)
//! content_block_start  -> tool_use | redacted_thinking | (opens a text/thinking block)
//! content_block_delta  -> text chunk | tool_call_delta | thinking chunk | signature_delta
//! content_block_stop   -> (closes the block)
//! message_delta        -> delta + usage, or error + usage on max_tokens
//! message_stop, ping   -> nothing
//! error                -> error
//! ```

use super::{MessageStream, Runner, TaskCache, api_key, http_client, send_with_retry};
use crate::config::Provider;
use crate::history::History;
use crate::normalize::normalize;
use crate::tools::Tool;
use crate::types::{
    AgentOptions, ContentBlock, MediaSource, Message, MessageInput, MessageRole, StopReason,
    Usage,
};
use crate::utils::{SseEvent, parse_sse_stream};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Messages streaming API
pub struct AnthropicRunner {
    options: AgentOptions,
    client: reqwest::Client,
    api_key: String,
    history: History,
    cache: TaskCache,
    cancel: CancellationToken,
}

impl AnthropicRunner {
    pub fn new(options: &AgentOptions, history: History, cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            client: http_client(options.timeout)?,
            api_key: api_key(options)?,
            options: options.clone(),
            history,
            cache: TaskCache::new(),
            cancel,
        })
    }

    fn request_body(&self, system: &str) -> Value {
        let mut body = json!({
            "model": self.options.model,
            "max_tokens": self.options.max_tokens,
            "messages": to_anthropic_messages(&self.history.snapshot()),
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.to_string());
        }
        if let Some(temperature) = self.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if !self.options.tools.is_empty() {
            body["tools"] = Value::Array(
                self.options
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "input_schema": t.input_schema(),
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[async_trait]
impl Runner for AnthropicRunner {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn cache(&self) -> &TaskCache {
        &self.cache
    }

    fn tools(&self) -> &[Tool] {
        &self.options.tools
    }

    async fn stream(
        &self,
        prompt: &str,
        chain_of_thought: Option<&str>,
        system: &str,
    ) -> Result<MessageStream> {
        self.history.append_last_prompt(prompt, chain_of_thought);

        let url = format!("{}/v1/messages", self.options.base_url);
        let body = self.request_body(system);
        log::debug!(
            "POST {} ({} history entries, {} tools)",
            url,
            body["messages"].as_array().map_or(0, Vec::len),
            self.options.tools.len()
        );

        let response = send_with_retry(&self.options.retry, &self.cancel, || {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
        })
        .await?;

        let mut translator = AnthropicTranslator::new(self.cache.clone());
        let messages = normalize(parse_sse_stream(response), move |event| {
            translator.translate(event)
        });
        Ok(Box::pin(
            messages.take_until(self.cancel.clone().cancelled_owned()),
        ))
    }
}

/// Stateful translation of Messages SSE events
#[derive(Debug)]
pub struct AnthropicTranslator {
    cache: TaskCache,
    // content block index -> tool use id
    tool_ids: HashMap<u64, String>,
}

impl AnthropicTranslator {
    pub fn new(cache: TaskCache) -> Self {
        Self {
            cache,
            tool_ids: HashMap::new(),
        }
    }

    pub fn translate(&mut self, event: SseEvent) -> Result<Vec<Message>> {
        let data: Value = serde_json::from_str(&event.data)?;
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(event.event.as_str());
        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);

        match kind {
            "message_start" => {
                let tokens = data["message"]["usage"]["input_tokens"].as_u64();
                Ok(tokens
                    .map(|n| vec![Message::usage(Usage::input(n))])
                    .unwrap_or_default())
            }
            "content_block_start" => self.block_start(index, &data["content_block"]),
            "content_block_delta" => self.block_delta(index, &data["delta"]),
            "content_block_stop" => {
                self.tool_ids.remove(&index);
                self.cache.end_block();
                Ok(Vec::new())
            }
            "message_delta" => Ok(message_delta(&data)),
            "error" => {
                let error = &data["error"];
                let message = error["message"].as_str().unwrap_or("unknown error");
                Ok(vec![Message::error(match error["type"].as_str() {
                    Some(t) => format!("{}: {}", t, message),
                    None => message.to_string(),
                })])
            }
            "message_stop" | "ping" => Ok(Vec::new()),
            other => {
                log::debug!("ignoring event {}", other);
                Ok(Vec::new())
            }
        }
    }

    fn block_start(&mut self, index: u64, block: &Value) -> Result<Vec<Message>> {
        match block["type"].as_str() {
            Some("tool_use") => {
                let id = block["id"]
                    .as_str()
                    .ok_or_else(|| Error::stream("tool_use block without an id"))?;
                let name = block["name"].as_str().unwrap_or_default();
                self.tool_ids.insert(index, id.to_string());
                // arguments follow as input_json_delta fragments
                Ok(vec![Message::tool_use(id, name, json!({}))])
            }
            Some("redacted_thinking") => Ok(vec![Message::assistant(vec![
                ContentBlock::RedactedThinking {
                    data: block["data"].as_str().unwrap_or_default().to_string(),
                },
            ])]),
            Some("thinking") => {
                let id = self.cache.begin_block();
                Ok(match block["thinking"].as_str() {
                    Some(t) if !t.is_empty() => vec![Message::thinking_chunk(id, t)],
                    _ => Vec::new(),
                })
            }
            Some("text") => {
                let id = self.cache.begin_block();
                Ok(match block["text"].as_str() {
                    Some(t) if !t.is_empty() => vec![Message::text_chunk(id, t)],
                    _ => Vec::new(),
                })
            }
            other => {
                log::debug!("ignoring content block {:?}", other);
                Ok(Vec::new())
            }
        }
    }

    fn block_delta(&mut self, index: u64, delta: &Value) -> Result<Vec<Message>> {
        match delta["type"].as_str() {
            Some("text_delta") => {
                let text = delta["text"].as_str().unwrap_or_default();
                Ok(vec![Message::text_chunk(self.cache.block_id(), text)])
            }
            Some("thinking_delta") => {
                let thinking = delta["thinking"].as_str().unwrap_or_default();
                Ok(vec![Message::thinking_chunk(self.cache.block_id(), thinking)])
            }
            Some("signature_delta") => Ok(vec![Message::assistant(vec![
                ContentBlock::SignatureDelta {
                    signature: delta["signature"].as_str().unwrap_or_default().to_string(),
                },
            ])]),
            Some("input_json_delta") => {
                let id = self
                    .tool_ids
                    .get(&index)
                    .cloned()
                    .ok_or_else(|| Error::stream(format!("input delta for unknown block {}", index)))?;
                let fragment = delta["partial_json"].as_str().unwrap_or_default();
                self.cache.push_partial(&id, fragment);
                Ok(vec![Message::assistant(vec![ContentBlock::ToolCallDelta {
                    id,
                    partial_json: fragment.to_string(),
                }])])
            }
            other => {
                log::debug!("ignoring delta {:?}", other);
                Ok(Vec::new())
            }
        }
    }
}

fn message_delta(data: &Value) -> Vec<Message> {
    let mut content = Vec::with_capacity(2);
    match data["delta"]["stop_reason"].as_str() {
        Some("max_tokens") => content.push(ContentBlock::max_tokens()),
        Some(reason) => {
            let stop_reason = match reason {
                "end_turn" => StopReason::EndTurn,
                "tool_use" => StopReason::ToolUse,
                "stop_sequence" => StopReason::StopSequence,
                other => {
                    log::debug!("treating stop reason {} as end_turn", other);
                    StopReason::EndTurn
                }
            };
            content.push(ContentBlock::Delta {
                stop_reason,
                stop_sequence: data["delta"]["stop_sequence"].as_str().map(str::to_string),
            });
        }
        None => {}
    }
    if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
        content.push(ContentBlock::Usage(Usage::output(tokens)));
    }

    if content.is_empty() {
        Vec::new()
    } else {
        vec![Message::assistant(content)]
    }
}

/// Render history in the Messages API shape.
///
/// Tool results travel as user content, consecutive same-role entries are
/// coalesced, and blocks the API cannot take are dropped.
pub fn to_anthropic_messages(entries: &[MessageInput]) -> Vec<Value> {
    let mut messages: Vec<(MessageRole, Vec<Value>)> = Vec::new();
    for entry in entries {
        let role = match entry.role {
            MessageRole::Assistant => MessageRole::Assistant,
            MessageRole::User | MessageRole::Tool => MessageRole::User,
            MessageRole::System => continue,
        };
        let blocks: Vec<Value> = entry.content.iter().filter_map(block_to_anthropic).collect();
        if blocks.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => messages.push((role, blocks)),
        }
    }

    messages
        .into_iter()
        .map(|(role, content)| {
            json!({
                "role": if role == MessageRole::Assistant { "assistant" } else { "user" },
                "content": content,
            })
        })
        .collect()
}

fn block_to_anthropic(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text(t) if !t.text.is_empty() => Some(json!({"type": "text", "text": t.text})),
        ContentBlock::Image { source } => Some(json!({
            "type": "image",
            "source": match source {
                MediaSource::Base64 { media_type, data } => {
                    json!({"type": "base64", "media_type": media_type, "data": data})
                }
                MediaSource::Url { url } => json!({"type": "url", "url": url}),
            },
        })),
        ContentBlock::ToolUse(t) => Some(json!({
            "type": "tool_use",
            "id": t.id,
            "name": t.name,
            "input": t.input,
        })),
        ContentBlock::ToolResult(r) => Some(json!({
            "type": "tool_result",
            "tool_use_id": r.tool_use_id,
            "content": r.content_text(),
            "is_error": r.is_error,
        })),
        // unsigned thinking is rejected on replay
        ContentBlock::Thinking(t) => t.signature.as_ref().map(|signature| {
            json!({"type": "thinking", "thinking": t.thinking, "signature": signature})
        }),
        ContentBlock::RedactedThinking { data } => {
            Some(json!({"type": "redacted_thinking", "data": data}))
        }
        other => {
            log::debug!("not replaying {:?} block", other.kind());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageType, ThinkingBlock, ToolResultBlock, ToolUseBlock};

    fn event(name: &str, data: Value) -> SseEvent {
        SseEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_text_chunks_share_block_id() {
        let mut translator = AnthropicTranslator::new(TaskCache::new());
        translator
            .translate(event(
                "content_block_start",
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            ))
            .unwrap();
        let a = translator
            .translate(event(
                "content_block_delta",
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
            ))
            .unwrap();
        let b = translator
            .translate(event(
                "content_block_delta",
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
            ))
            .unwrap();
        assert_eq!(a[0].id, b[0].id);
        assert!(a[0].is_chunk());
        assert_eq!(b[0].text(), "lo");
    }

    #[test]
    fn test_tool_use_and_streamed_input() {
        let cache = TaskCache::new();
        let mut translator = AnthropicTranslator::new(cache.clone());
        let start = translator
            .translate(event(
                "content_block_start",
                json!({"type": "content_block_start", "index": 1,
                       "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}}),
            ))
            .unwrap();
        assert_eq!(start[0].kind, MessageType::ToolUse);

        for fragment in [r#"{"q": "#, r#""rust"}"#] {
            let out = translator
                .translate(event(
                    "content_block_delta",
                    json!({"type": "content_block_delta", "index": 1,
                           "delta": {"type": "input_json_delta", "partial_json": fragment}}),
                ))
                .unwrap();
            assert_eq!(out[0].kind, MessageType::ToolCallDelta);
        }
        assert_eq!(cache.take_partial("toolu_1"), Some(json!({"q": "rust"})));
    }

    #[test]
    fn test_max_tokens_becomes_error_with_usage() {
        let mut translator = AnthropicTranslator::new(TaskCache::new());
        let out = translator
            .translate(event(
                "message_delta",
                json!({"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {"output_tokens": 7}}),
            ))
            .unwrap();
        assert!(out[0].is_error());
        assert!(out[0]
            .content
            .contains(&ContentBlock::Usage(Usage::output(7))));
    }

    #[test]
    fn test_vendor_error_event() {
        let mut translator = AnthropicTranslator::new(TaskCache::new());
        let out = translator
            .translate(event(
                "error",
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            ))
            .unwrap();
        assert_eq!(out[0].content, vec![ContentBlock::error("overloaded_error: Overloaded")]);
    }

    #[test]
    fn test_ping_and_stop_translate_to_nothing() {
        let mut translator = AnthropicTranslator::new(TaskCache::new());
        assert!(translator
            .translate(event("ping", json!({"type": "ping"})))
            .unwrap()
            .is_empty());
        assert!(translator
            .translate(event("message_stop", json!({"type": "message_stop"})))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut translator = AnthropicTranslator::new(TaskCache::new());
        let result = translator.translate(SseEvent {
            event: "content_block_delta".into(),
            data: "{not json".into(),
        });
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_history_rendering() {
        let entries = vec![
            MessageInput::user("weather?"),
            MessageInput::assistant(vec![
                ThinkingBlock::new("unsigned").into(),
                ContentBlock::ToolUse(ToolUseBlock::new("toolu_1", "get_weather", json!({"city": "Paris"}))),
            ]),
            MessageInput::new(
                MessageRole::User,
                vec![ContentBlock::ToolResult(ToolResultBlock::new("toolu_1", json!({"temp": 20})))],
            ),
            MessageInput::new(MessageRole::Tool, vec![ContentBlock::text("extra")]),
        ];
        let rendered = to_anthropic_messages(&entries);

        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[1]["content"].as_array().unwrap().len(), 1);
        assert_eq!(rendered[1]["content"][0]["type"], "tool_use");
        assert_eq!(rendered[2]["role"], "user");
        assert_eq!(rendered[2]["content"][0]["content"], r#"{"temp":20}"#);
        assert_eq!(rendered[2]["content"][1]["text"], "extra");
    }
}
