//! Streaming utilities: SSE decoding and partial tool input aggregation.
//!
//! # SSE
//!
//! Both remote vendors stream Server-Sent Events with named events:
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{...}}
//!
//! ```
//!
//! [`parse_sse_stream`] turns a response body into a stream of
//! [`SseEvent`]s, leaving JSON decoding to the adapter that knows the
//! grammar.
//!
//! # Partial tool input
//!
//! Tool arguments arrive as JSON fragments split at arbitrary positions:
//!
//! ```text
//! delta 1: {"loc
//! delta 2: ation":"Par
//! delta 3: is"}
//! ```
//!
//! [`PartialInputs`] concatenates the fragments per tool id and parses the
//! result once the call is complete.

use crate::{Error, Result};
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// One decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none
    pub event: String,
    pub data: String,
}

/// Decode an HTTP response body as Server-Sent Events.
///
/// Transport failures surface as [`Error::Stream`] items; the `[DONE]`
/// sentinel some servers send is dropped.
pub fn parse_sse_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>> {
    let stream = body
        .bytes_stream()
        .eventsource()
        .filter_map(|result| async move {
            match result {
                Ok(event) if event.data == "[DONE]" => None,
                Ok(event) => Some(Ok(SseEvent {
                    event: if event.event.is_empty() {
                        "message".to_string()
                    } else {
                        event.event
                    },
                    data: event.data,
                })),
                Err(e) => Some(Err(Error::stream(format!("SSE transport error: {}", e)))),
            }
        });

    Box::pin(stream)
}

/// Accumulates streamed tool arguments keyed by tool id
#[derive(Debug, Default, Clone)]
pub struct PartialInputs {
    buffers: HashMap<String, String>,
}

impl PartialInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment
    pub fn push(&mut self, id: &str, fragment: &str) {
        self.buffers
            .entry(id.to_string())
            .or_default()
            .push_str(fragment);
    }

    /// Raw text accumulated so far
    pub fn raw(&self, id: &str) -> Option<&str> {
        self.buffers.get(id).map(String::as_str)
    }

    /// Remove and parse the accumulated input.
    ///
    /// `None` when nothing was streamed for `id`. Empty or invalid JSON
    /// resolves to `{}`; invalid JSON is logged.
    pub fn take(&mut self, id: &str) -> Option<Value> {
        let raw = self.buffers.remove(id)?;
        Some(parse_arguments(id, &raw))
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Parse a complete argument string, falling back to an empty object
pub fn parse_arguments(id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            log::warn!("tool {} arguments are not an object: {}", id, other);
            Value::Object(Default::default())
        }
        Err(e) => {
            log::warn!("tool {} arguments are not valid JSON ({}): {:?}", id, e, raw);
            Value::Object(Default::default())
        }
    }
}
