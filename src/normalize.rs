//! Stream normalization
//!
//! Adapters only know how to turn one vendor event into zero or more
//! [`Message`]s. [`normalize`] wraps that translation and enforces the
//! stream-level rules every consumer relies on:
//!
//! - usage blocks never share a message with content; they are split into a
//!   standalone `usage` message emitted right after the remainder
//! - messages left without content are dropped
//! - at most one `delta` per stream
//! - transport and translation failures become `error` messages and reading
//!   continues; cancellation ends the stream silently

use crate::runner::MessageStream;
use crate::types::{ContentBlock, Message, MessageType, Usage};
use crate::{Error, Result};
use async_stream::stream;
use futures::stream::{Stream, StreamExt};

/// Apply `translate` to every raw event and yield normalized messages
pub fn normalize<S, E, F>(raw: S, mut translate: F) -> MessageStream
where
    S: Stream<Item = Result<E>> + Send + 'static,
    E: Send + 'static,
    F: FnMut(E) -> Result<Vec<Message>> + Send + 'static,
{
    Box::pin(stream! {
        let mut raw = Box::pin(raw);
        let mut delta_seen = false;

        while let Some(item) = raw.next().await {
            let translated = match item {
                Ok(event) => translate(event),
                Err(e) => Err(e),
            };

            let messages = match translated {
                Ok(messages) => messages,
                Err(Error::Cancelled) => {
                    log::debug!("stream cancelled, closing");
                    break;
                }
                Err(e) => {
                    log::warn!("stream event failed: {}", e);
                    yield Message::error(e.to_string());
                    continue;
                }
            };

            for message in messages {
                for out in split_usage(message) {
                    if out.kind == MessageType::Delta {
                        if delta_seen {
                            log::debug!("dropping repeated delta {:?}", out.stop_reason());
                            continue;
                        }
                        delta_seen = true;
                    }
                    yield out;
                }
            }
        }
    })
}

/// Separate usage blocks from the rest of a message.
///
/// The remainder keeps the original id; every usage block is summed into one
/// trailing `usage` message. Empty results are dropped.
pub fn split_usage(mut message: Message) -> Vec<Message> {
    let mut usage: Option<Usage> = None;
    message.content.retain(|block| match block {
        ContentBlock::Usage(u) => {
            let total = usage.get_or_insert_with(Usage::default);
            total.input_tokens = add_tokens(total.input_tokens, u.input_tokens);
            total.output_tokens = add_tokens(total.output_tokens, u.output_tokens);
            false
        }
        _ => true,
    });

    let mut out = Vec::with_capacity(2);
    if !message.is_empty() {
        message.refresh_kind();
        out.push(message);
    }
    if let Some(usage) = usage {
        out.push(Message::usage(usage));
    }
    out
}

fn add_tokens(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}
