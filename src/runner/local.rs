//! In-process adapter
//!
//! Local models have no structured output channel. Everything arrives as
//! text pieces, so reasoning, tool calls and media references are recovered
//! with the [`BlockParser`] using the model's own [`TagSet`]. Tool calls are
//! held back until generation finishes; media references are fetched and
//! inlined as they complete.

use super::{MessageStream, Runner, TaskCache, http_client};
use crate::call_expr::{ParsedToolCall, parse_tool_calls};
use crate::config::Provider;
use crate::history::History;
use crate::media::{MediaKind, render_media};
use crate::model_cache::{GenerationParams, ModelRegistry};
use crate::normalize::normalize;
use crate::parser::{BlockParser, ParsedBlock};
use crate::retry::retry_with_backoff_conditional;
use crate::tools::Tool;
use crate::types::{AgentOptions, ContentBlock, Message, StopReason, Usage};
use crate::{Error, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Adapter for models served from a [`ModelRegistry`]
pub struct LocalRunner {
    options: AgentOptions,
    client: reqwest::Client,
    history: History,
    cache: TaskCache,
    cancel: CancellationToken,
    models: Arc<ModelRegistry>,
}

impl LocalRunner {
    pub fn new(
        options: &AgentOptions,
        history: History,
        cancel: CancellationToken,
        models: Arc<ModelRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(options.timeout)?,
            options: options.clone(),
            history,
            cache: TaskCache::new(),
            cancel,
            models,
        })
    }
}

#[async_trait]
impl Runner for LocalRunner {
    fn provider(&self) -> Provider {
        Provider::Local
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

        let model_id = self.options.model.as_str();
        let load = retry_with_backoff_conditional(self.options.retry.clone(), || {
            self.models.get_or_load(model_id)
        });
        let model = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            model = load => model?,
        };

        // Re-rendered from scratch on every call, so a resumed round sees
        // the tool results recorded since the last generation.
        let rendered =
            model.apply_chat_template(system, &self.history.snapshot(), &self.options.tools);
        let tokens = model.encode(&rendered)?;
        let prompt_tokens = tokens.len() as u64;
        log::debug!(
            "generating with {} ({} prompt tokens)",
            model.id(),
            prompt_tokens
        );

        let params = GenerationParams {
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        };
        let mut pieces = model.generate(tokens, params, self.cancel.clone())?;
        let mut parser = BlockParser::new(model.tag_set());
        let client = self.client.clone();
        let cancel = self.cancel.clone();

        let events = stream! {
            let mut generated = 0u64;
            while let Some(piece) = pieces.next().await {
                match piece {
                    Ok(text) => {
                        generated += 1;
                        for block in parser.feed(&text) {
                            yield resolve_block(&client, &cancel, block).await;
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
            for block in parser.finish() {
                yield resolve_block(&client, &cancel, block).await;
            }
            yield Ok(LocalEvent::Finished {
                prompt_tokens,
                generated,
                truncated: generated >= u64::from(params.max_tokens),
            });
        };

        let mut translator = LocalTranslator::new(self.cache.clone(), self.options.tools.clone());
        let messages = normalize(events, move |event| translator.translate(event));
        Ok(Box::pin(
            messages.take_until(self.cancel.clone().cancelled_owned()),
        ))
    }
}

/// One step of local generation, after tag parsing and media rendering
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    Block(ParsedBlock),
    Media(ContentBlock),
    Finished {
        prompt_tokens: u64,
        generated: u64,
        truncated: bool,
    },
}

async fn resolve_block(
    client: &reqwest::Client,
    cancel: &CancellationToken,
    block: ParsedBlock,
) -> Result<LocalEvent> {
    match block {
        ParsedBlock::Image(url) => render_media(client, MediaKind::Image, &url, cancel)
            .await
            .map(LocalEvent::Media),
        ParsedBlock::Audio(url) => render_media(client, MediaKind::Audio, &url, cancel)
            .await
            .map(LocalEvent::Media),
        other => Ok(LocalEvent::Block(other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Text,
    Thinking,
}

/// Turns local generation events into messages
#[derive(Debug)]
pub struct LocalTranslator {
    cache: TaskCache,
    tools: Vec<Tool>,
    pending: Vec<ParsedToolCall>,
    current: Option<TextKind>,
}

impl LocalTranslator {
    pub fn new(cache: TaskCache, tools: Vec<Tool>) -> Self {
        Self {
            cache,
            tools,
            pending: Vec::new(),
            current: None,
        }
    }

    pub fn translate(&mut self, event: LocalEvent) -> Result<Vec<Message>> {
        match event {
            LocalEvent::Block(ParsedBlock::Text(text)) => {
                Ok(vec![Message::text_chunk(self.block_id(TextKind::Text), text)])
            }
            LocalEvent::Block(ParsedBlock::Thinking(text)) => {
                Ok(vec![Message::thinking_chunk(self.block_id(TextKind::Thinking), text)])
            }
            LocalEvent::Block(ParsedBlock::ToolCall(payload)) => {
                match parse_tool_calls(&payload, &self.tools) {
                    Ok(calls) => self.pending.extend(calls),
                    Err(e) => log::warn!("skipping tool call {:?}: {}", payload, e),
                }
                Ok(Vec::new())
            }
            LocalEvent::Block(other) => {
                log::debug!("unrendered media block {:?}", other);
                Ok(Vec::new())
            }
            LocalEvent::Media(block) => {
                self.current = None;
                Ok(vec![Message::assistant(vec![block])])
            }
            LocalEvent::Finished {
                prompt_tokens,
                generated,
                truncated,
            } => Ok(self.finish(prompt_tokens, generated, truncated)),
        }
    }

    fn block_id(&mut self, kind: TextKind) -> String {
        if self.current != Some(kind) {
            self.current = Some(kind);
            return self.cache.begin_block();
        }
        self.cache.block_id()
    }

    fn finish(&mut self, prompt_tokens: u64, generated: u64, truncated: bool) -> Vec<Message> {
        let calls = std::mem::take(&mut self.pending);
        let stop = if !calls.is_empty() {
            ContentBlock::delta(StopReason::ToolUse)
        } else if truncated {
            ContentBlock::max_tokens()
        } else {
            ContentBlock::delta(StopReason::EndTurn)
        };

        let mut out: Vec<Message> = calls
            .into_iter()
            .map(|call| Message::tool_use(call.id, call.name, call.input))
            .collect();
        out.push(Message::assistant(vec![
            stop,
            ContentBlock::Usage(Usage {
                input_tokens: Some(prompt_tokens),
                output_tokens: Some(generated),
            }),
        ]));
        out
    }
}
