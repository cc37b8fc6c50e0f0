//! Auto-mode tool loop
//!
//! The orchestrator sits between an adapter stream and the consumer:
//!
//! ```text
//!   Streaming ──(reader ends with tool uses queued)──> Dispatching
//!       ^                                                  │
//!       └──────────── Resuming: runner.stream("") <────────┘
//! ```
//!
//! While streaming it forwards every message and keeps history in step with
//! what the model produced. When a turn ends with tool uses queued it runs
//! the host callback for each one, forwards the recorded `tool_result`, and
//! opens a fresh adapter stream that replays the updated history. Nothing is
//! read ahead while a tool runs. A `max_tokens` cut-off is final even with
//! tool uses queued, since their arguments may be truncated. Tool uses left
//! unanswered by cancellation get an `is_error` result in history.

use crate::Error;
use crate::history::History;
use crate::runner::{MessageStream, Runner, TaskCache};
use crate::tools::ToolCallback;
use crate::types::{
    ContentBlock, Message, MessageInput, MessageType, ToolResultBlock, ToolUseBlock,
};
use async_stream::stream;
use futures::stream::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the loop needs besides the first stream
#[derive(Clone)]
pub struct Orchestrator {
    pub runner: Arc<dyn Runner>,
    pub callback: ToolCallback,
    pub cancel: CancellationToken,
    pub system: String,
    pub max_tool_rounds: u32,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.runner.provider())
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

impl Orchestrator {
    /// Drive `first` and every stream opened after a tool round
    pub fn run(self, first: MessageStream) -> MessageStream {
        let Orchestrator {
            runner,
            callback,
            cancel,
            system,
            max_tool_rounds,
        } = self;

        Box::pin(stream! {
            let history = runner.history().clone();
            let cache = runner.cache().clone();
            let mut reader: Option<MessageStream> = Some(first);
            let mut rounds = 0u32;

            'task: while let Some(mut current) = reader.take() {
                // ================================================================
                // Streaming
                // ================================================================
                let mut pending: Vec<ToolUseBlock> = Vec::new();
                let mut finished = false;

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        next = current.next() => Some(next),
                    };
                    let Some(next) = next else {
                        log::debug!("task cancelled while streaming");
                        break 'task;
                    };
                    let Some(message) = next else {
                        break;
                    };

                    match message.kind {
                        MessageType::Text => history.append_assistant_text(&message.text()),
                        MessageType::Thinking
                        | MessageType::RedactedThinking
                        | MessageType::SignatureDelta => {
                            for block in &message.content {
                                history.append_thinking(block.clone());
                            }
                        }
                        MessageType::ToolUse => {
                            history.append_messages(vec![MessageInput::from_message(&message)]);
                            pending.extend(message.tool_uses().cloned());
                        }
                        MessageType::Image | MessageType::Audio => {
                            history.append_messages(vec![MessageInput::from_message(&message)]);
                        }
                        MessageType::Usage => {
                            for block in &message.content {
                                if let ContentBlock::Usage(usage) = block {
                                    cache.record_usage(usage);
                                }
                            }
                        }
                        MessageType::Delta => {
                            if message.is_terminal() {
                                finished = true;
                            }
                        }
                        // a max_tokens cut-off ends the turn; other errors do not
                        MessageType::Error => {
                            if message.is_max_tokens() {
                                finished = true;
                            }
                        }
                        MessageType::ToolCallDelta | MessageType::ToolResult => {}
                    }
                    yield message;
                }
                drop(current);

                if finished || pending.is_empty() {
                    break 'task;
                }

                // ================================================================
                // Dispatching
                // ================================================================
                rounds += 1;
                if rounds > max_tool_rounds {
                    log::warn!("stopping after {} tool rounds", max_tool_rounds);
                    yield Message::error(format!(
                        "tool round limit of {} reached",
                        max_tool_rounds
                    ));
                    break 'task;
                }

                let mut queue = pending.into_iter();
                while let Some(tool_use) = queue.next() {
                    let input = resolve_input(&cache, &tool_use);
                    history.resolve_tool_input(&tool_use.id, input.clone());
                    let call = Message::tool_use(&tool_use.id, &tool_use.name, input);

                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        outcome = callback(call, cancel.clone()) => Some(outcome),
                    };
                    let result = match outcome {
                        None | Some(Err(Error::Cancelled)) => {
                            log::debug!("task cancelled during tool {}", tool_use.name);
                            for unanswered in std::iter::once(tool_use).chain(queue.by_ref()) {
                                if history.tool_result_for(&unanswered.id).is_none() {
                                    let reason = Error::Cancelled.to_string();
                                    record_failure(&history, &unanswered, reason);
                                }
                            }
                            break 'task;
                        }
                        Some(Ok(())) => match history.tool_result_for(&tool_use.id) {
                            Some(result) => result,
                            None => record_failure(
                                &history,
                                &tool_use,
                                "tool callback recorded no result".to_string(),
                            ),
                        },
                        Some(Err(e)) => {
                            log::warn!("tool {} failed: {}", tool_use.name, e);
                            record_failure(&history, &tool_use, e.to_string())
                        }
                    };
                    yield Message::tool_result(result.with_name(&tool_use.name));
                }

                // ================================================================
                // Resuming
                // ================================================================
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    opened = runner.stream("", None, &system) => Some(opened),
                };
                match opened {
                    None | Some(Err(Error::Cancelled)) => break 'task,
                    Some(Ok(next)) => reader = Some(next),
                    Some(Err(e)) => {
                        log::warn!("failed to resume after tool round: {}", e);
                        yield Message::error(e.to_string());
                    }
                }
            }
        })
    }
}

/// Streamed arguments win; otherwise the input the tool use carried, or `{}`
fn resolve_input(cache: &TaskCache, tool_use: &ToolUseBlock) -> Value {
    if let Some(input) = cache.take_partial(&tool_use.id) {
        return input;
    }
    match &tool_use.input {
        Value::Object(map) if !map.is_empty() => tool_use.input.clone(),
        _ => Value::Object(Default::default()),
    }
}

fn record_failure(
    history: &History,
    tool_use: &ToolUseBlock,
    message: String,
) -> ToolResultBlock {
    let result = ToolResultBlock::error(&tool_use.id, message);
    history.append_tool_result(result.clone());
    result
}
