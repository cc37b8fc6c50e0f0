//! Chunked wire protocol
//!
//! A task stream crosses HTTP as a chunked body: each message is its JSON
//! encoding followed by [`DELIMITER`]. The body ends after the first
//! terminal message (a `delta` that ends the turn, or an `error`).
//!
//! ```text
//! {"id":"msg_1","role":"assistant","type":"text",...}<-[*0M0*]->{"id":...}<-[*0M0*]->
//! ```
//!
//! Conversations are keyed by [`thread_id`], a SHA-256 digest of the model
//! configuration, sent in the [`THREAD_ID_HEADER`] header.

use crate::runner::MessageStream;
use crate::types::{Message, StopReason};
use crate::{Error, Result};
use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Separator written after every encoded message
pub const DELIMITER: &str = "<-[*0M0*]->";

/// Header carrying the conversation key
pub const THREAD_ID_HEADER: &str = "x-thread-id";

/// Encode one message as a wire chunk
pub fn encode_chunk(message: &Message) -> Result<String> {
    let mut chunk = serde_json::to_string(message)?;
    chunk.push_str(DELIMITER);
    Ok(chunk)
}

/// Whether the wire stream closes after this message
///
/// Only `end_turn`, `max_tokens` and `error` close the body. A
/// `stop_sequence` delta is forwarded with the body left open; the task
/// stream ends right after it anyway.
pub fn is_terminal(message: &Message) -> bool {
    message.is_error()
        || matches!(
            message.stop_reason(),
            Some(StopReason::EndTurn | StopReason::MaxTokens)
        )
}

/// Encode a task stream, stopping after the terminal message
pub fn into_wire_stream(mut messages: MessageStream) -> impl Stream<Item = Result<String>> + Send {
    stream! {
        while let Some(message) = messages.next().await {
            let last = is_terminal(&message);
            yield encode_chunk(&message);
            if last {
                break;
            }
        }
    }
}

/// Conversation key for a model configuration
pub fn thread_id<T: Serialize + ?Sized>(config: &T) -> Result<String> {
    let encoded = serde_json::to_vec(config)?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

/// Client-side reassembly of wire chunks.
///
/// Bytes may be split anywhere, including inside the delimiter or a
/// multibyte character.
#[derive(Debug, Default)]
pub struct WireDecoder {
    buffer: Vec<u8>,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes and decode every completed message
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Message>> {
        self.buffer.extend_from_slice(bytes);
        let delimiter = DELIMITER.as_bytes();
        let mut out = Vec::new();

        while let Some(pos) = find(&self.buffer, delimiter) {
            let chunk: Vec<u8> = self.buffer.drain(..pos + delimiter.len()).collect();
            let body = &chunk[..pos];
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            out.push(serde_json::from_slice(body).map_err(Error::from));
        }
        out
    }

    /// Bytes received after the last delimiter
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Decode a trailing message sent without a delimiter, if any
    pub fn finish(&mut self) -> Option<Result<Message>> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(serde_json::from_slice(&rest).map_err(Error::from))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
