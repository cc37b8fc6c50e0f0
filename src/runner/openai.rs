//! Responses-style SSE adapter
//!
//! The Responses API streams an item lifecycle rather than content blocks.
//! Function calls are announced by `response.output_item.added`, their
//! arguments arrive as `response.function_call_arguments.delta` fragments
//! keyed by item id, and `response.function_call_arguments.done` closes
//! them. Text arrives as `response.output_text.delta`; models that reason
//! inline wrap it in `<thinking>` tags, which are split out here.

use super::{MessageStream, Runner, TaskCache, api_key, http_client, send_with_retry};
use crate::config::Provider;
use crate::history::History;
use crate::normalize::normalize;
use crate::parser::{BlockParser, ParsedBlock, TagSet};
use crate::tools::Tool;
use crate::types::{
    AgentOptions, ContentBlock, MediaSource, Message, MessageInput, MessageRole, StopReason,
    Usage,
};
use crate::utils::{SseEvent, parse_arguments, parse_sse_stream};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Adapter for the Responses streaming API
pub struct OpenAiRunner {
    options: AgentOptions,
    client: reqwest::Client,
    api_key: String,
    history: History,
    cache: TaskCache,
    cancel: CancellationToken,
}

impl OpenAiRunner {
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
            "input": to_responses_input(&self.history.snapshot()),
            "max_output_tokens": self.options.max_tokens,
            "stream": true,
        });
        if !system.is_empty() {
            body["instructions"] = Value::String(system.to_string());
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
                            "type": "function",
                            "name": t.name(),
                            "description": t.description(),
                            "parameters": t.input_schema(),
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[async_trait]
impl Runner for OpenAiRunner {
    fn provider(&self) -> Provider {
        Provider::OpenAi
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

        let url = format!("{}/responses", self.options.base_url);
        let body = self.request_body(system);
        log::debug!(
            "POST {} ({} input items, {} tools)",
            url,
            body["input"].as_array().map_or(0, Vec::len),
            self.options.tools.len()
        );

        let response = send_with_retry(&self.options.retry, &self.cancel, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&body)
        })
        .await?;

        let mut translator = ResponsesTranslator::new(self.cache.clone());
        let messages = normalize(parse_sse_stream(response), move |event| {
            translator.translate(event)
        });
        Ok(Box::pin(
            messages.take_until(self.cancel.clone().cancelled_owned()),
        ))
    }
}

#[derive(Debug, Clone)]
struct FunctionCall {
    name: String,
    call_id: String,
    arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Text,
    Thinking,
}

/// Stateful translation of Responses SSE events
#[derive(Debug)]
pub struct ResponsesTranslator {
    cache: TaskCache,
    // output item id -> function call
    calls: HashMap<String, FunctionCall>,
    parser: BlockParser,
    current: Option<TextKind>,
    emitted_calls: usize,
}

impl ResponsesTranslator {
    pub fn new(cache: TaskCache) -> Self {
        Self {
            cache,
            calls: HashMap::new(),
            parser: BlockParser::new(TagSet::thinking_only()),
            current: None,
            emitted_calls: 0,
        }
    }

    pub fn translate(&mut self, event: SseEvent) -> Result<Vec<Message>> {
        let data: Value = serde_json::from_str(&event.data)?;
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(event.event.as_str());

        match kind {
            "response.output_item.added" => {
                let item = &data["item"];
                if item["type"] == "function_call" {
                    let item_id = item["id"].as_str().unwrap_or_default().to_string();
                    let call_id = item["call_id"].as_str().unwrap_or(&item_id).to_string();
                    self.calls.insert(
                        item_id,
                        FunctionCall {
                            name: item["name"].as_str().unwrap_or_default().to_string(),
                            call_id,
                            arguments: String::new(),
                        },
                    );
                }
                Ok(Vec::new())
            }
            "response.function_call_arguments.delta" => {
                let item_id = data["item_id"].as_str().unwrap_or_default();
                let fragment = data["delta"].as_str().unwrap_or_default();
                let call = self.calls.get_mut(item_id).ok_or_else(|| {
                    Error::stream(format!("arguments for unknown item {}", item_id))
                })?;
                call.arguments.push_str(fragment);
                Ok(vec![Message::assistant(vec![ContentBlock::ToolCallDelta {
                    id: call.call_id.clone(),
                    partial_json: fragment.to_string(),
                }])])
            }
            "response.function_call_arguments.done" => {
                let item_id = data["item_id"].as_str().unwrap_or_default();
                let call = self.calls.remove(item_id).ok_or_else(|| {
                    Error::stream(format!("arguments for unknown item {}", item_id))
                })?;
                let raw = data["arguments"].as_str().unwrap_or(&call.arguments);
                let input = parse_arguments(&call.call_id, raw);
                self.emitted_calls += 1;
                Ok(vec![Message::tool_use(call.call_id, call.name, input)])
            }
            "response.output_text.delta" => {
                let blocks = self.parser.feed(data["delta"].as_str().unwrap_or_default());
                Ok(self.text_messages(blocks))
            }
            "response.completed" => {
                let mut messages = self.flush();
                let mut content = vec![ContentBlock::delta(if self.emitted_calls > 0 {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                })];
                content.extend(usage_block(&data["response"]["usage"]));
                messages.push(Message::assistant(content));
                Ok(messages)
            }
            "response.incomplete" => {
                let mut messages = self.flush();
                let response = &data["response"];
                let mut content = vec![match response["incomplete_details"]["reason"].as_str() {
                    Some("max_output_tokens") | None => ContentBlock::max_tokens(),
                    Some(reason) => ContentBlock::error(format!("response incomplete: {}", reason)),
                }];
                content.extend(usage_block(&response["usage"]));
                messages.push(Message::assistant(content));
                Ok(messages)
            }
            "response.failed" => {
                let error = &data["response"]["error"];
                Ok(vec![Message::error(
                    error["message"].as_str().unwrap_or("response failed"),
                )])
            }
            "error" => {
                let message = data["message"].as_str().unwrap_or("unknown error");
                Ok(vec![Message::error(match data["code"].as_str() {
                    Some(code) => format!("{}: {}", code, message),
                    None => message.to_string(),
                })])
            }
            other => {
                log::debug!("ignoring event {}", other);
                Ok(Vec::new())
            }
        }
    }

    fn flush(&mut self) -> Vec<Message> {
        let blocks = self.parser.finish();
        self.text_messages(blocks)
    }

    fn text_messages(&mut self, blocks: Vec<ParsedBlock>) -> Vec<Message> {
        let mut out = Vec::with_capacity(blocks.len());
        for block in blocks {
            let (kind, text) = match block {
                ParsedBlock::Text(text) => (TextKind::Text, text),
                ParsedBlock::Thinking(text) => (TextKind::Thinking, text),
                other => {
                    log::debug!("unexpected block in vendor text: {:?}", other);
                    continue;
                }
            };
            // a switch between prose and reasoning starts a new chunk group
            if self.current != Some(kind) {
                self.cache.begin_block();
                self.current = Some(kind);
            }
            let id = self.cache.block_id();
            out.push(match kind {
                TextKind::Text => Message::text_chunk(id, text),
                TextKind::Thinking => Message::thinking_chunk(id, text),
            });
        }
        out
    }
}

fn usage_block(usage: &Value) -> Option<ContentBlock> {
    let input_tokens = usage["input_tokens"].as_u64();
    let output_tokens = usage["output_tokens"].as_u64();
    if input_tokens.is_none() && output_tokens.is_none() {
        return None;
    }
    Some(ContentBlock::Usage(Usage {
        input_tokens,
        output_tokens,
    }))
}

/// Render history as Responses input items.
///
/// Tool uses and results become top-level `function_call` and
/// `function_call_output` items; reasoning is not replayed.
pub fn to_responses_input(entries: &[MessageInput]) -> Vec<Value> {
    let mut input = Vec::new();
    for entry in entries {
        let (role, text_type) = match entry.role {
            MessageRole::Assistant => ("assistant", "output_text"),
            MessageRole::User | MessageRole::Tool => ("user", "input_text"),
            MessageRole::System => continue,
        };

        let mut parts = Vec::new();
        for block in &entry.content {
            match block {
                ContentBlock::Text(t) if !t.text.is_empty() => {
                    parts.push(json!({"type": text_type, "text": t.text}));
                }
                ContentBlock::Image { source } if entry.role != MessageRole::Assistant => {
                    parts.push(json!({"type": "input_image", "image_url": image_url(source)}));
                }
                ContentBlock::ToolUse(t) => {
                    flush_parts(&mut input, role, &mut parts);
                    input.push(json!({
                        "type": "function_call",
                        "call_id": t.id,
                        "name": t.name,
                        "arguments": t.input.to_string(),
                    }));
                }
                ContentBlock::ToolResult(r) => {
                    flush_parts(&mut input, role, &mut parts);
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": r.tool_use_id,
                        "output": r.content_text(),
                    }));
                }
                other => log::debug!("not replaying {:?} block", other.kind()),
            }
        }
        flush_parts(&mut input, role, &mut parts);
    }
    input
}

fn flush_parts(input: &mut Vec<Value>, role: &str, parts: &mut Vec<Value>) {
    if !parts.is_empty() {
        input.push(json!({"role": role, "content": std::mem::take(parts)}));
    }
}

fn image_url(source: &MediaSource) -> String {
    match source {
        MediaSource::Base64 { media_type, data } => format!("data:{};base64,{}", media_type, data),
        MediaSource::Url { url } => url.clone(),
    }
}
