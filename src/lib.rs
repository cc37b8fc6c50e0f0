//! # Agent Runtime
//!
//! A streaming-first runtime for LLM agents. One canonical message protocol
//! sits over three backends:
//!
//! - **Anthropic**: the Messages streaming API
//! - **OpenAI**: the Responses streaming API
//! - **Local**: in-process models plugged in through a [`ModelRegistry`]
//!
//! ## Key Features
//!
//! - **One Message Shape**: every backend event becomes a [`Message`] of
//!   [`ContentBlock`]s; text and reasoning arrive as chunks sharing an id
//! - **Automatic Tool Loop**: tool uses are executed through a host
//!   callback and the conversation resumes on its own
//! - **Textual Tool Calls**: models without native tool calling are parsed
//!   for `<tool_call>`, `<thinking>` and media tags
//! - **Cancellation**: one token stops generation, tool calls and fetches
//! - **Bounded Retry**: connection failures are retried on a fixed delay
//! - **Wire Protocol**: task streams encode to a delimited chunked body
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_runtime::{Agent, AgentOptions, MessageType, Provider};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .provider(Provider::OpenAi)
//!         .system_prompt("You are a helpful assistant")
//!         .model("gpt-4o-mini")
//!         .build()?;
//!
//!     let agent = Agent::new(options)?;
//!     let mut task = agent.perform_task("What's the capital of France?").await;
//!
//!     while let Some(message) = task.stream.next().await {
//!         match message.kind {
//!             MessageType::Text => print!("{}", message.text()),
//!             MessageType::Error => eprintln!("error: {:?}", message.content),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agent**: the [`Agent`] façade and `perform_task`
//! - **orchestrator**: the auto-mode tool loop
//! - **runner**: backend adapters and their per-task cache
//! - **normalize**: stream-level rules shared by every adapter
//! - **parser** / **call_expr** / **media**: recovery of structure from raw text
//! - **history**: the shared conversation store
//! - **model_cache**: init-once registry of in-process models
//! - **tools**: tool descriptors, handlers and callbacks
//! - **types**: messages, content blocks and configuration
//! - **wire**: the chunked HTTP encoding
//! - **config** / **error** / **retry** / **utils**: ambient plumbing

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// Private unless re-exported below.

/// The `Agent` façade binding a runner, prompts and a tool callback.
mod agent;

/// Tool-call payload parsing (JSON and call expressions) for textual tool calls.
mod call_expr;

/// Provider enum and environment helpers for endpoints, models and keys.
mod config;

/// Error types and the `Result<T>` alias used across the crate.
mod error;

/// Shared conversation history with merge-on-insert.
mod history;

/// Fetching and inlining of image and audio references.
mod media;

/// In-process model trait, loader and registry.
mod model_cache;

/// Stream normalization applied to every adapter's output.
mod normalize;

/// The auto-mode tool loop.
mod orchestrator;

/// Incremental tag parser for raw model text.
mod parser;

/// Tool descriptors, schema conversion and the handler registry.
mod tools;

/// Core message and configuration types.
mod types;

/// SSE decoding and partial tool input aggregation.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities. Public so hosts can reuse the policy for their own calls.
pub mod retry;

/// Backend adapters, the `Runner` trait and the per-task cache.
pub mod runner;

/// Chunked wire protocol for serving task streams over HTTP.
pub mod wire;

// --- Agent ---

pub use agent::{Agent, TaskResponse};
pub use orchestrator::Orchestrator;

// --- Provider Configuration ---

pub use config::{Provider, get_api_key, get_base_url, get_model};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Conversation State ---

pub use history::{History, collapse_thinking};

// --- Streams ---

pub use normalize::{normalize, split_usage};
pub use runner::{MessageStream, Runner, TaskCache, UsageCounter, create_runner};

// --- Textual Parsing ---

pub use call_expr::{ParsedToolCall, new_synthetic_tool_call_id, parse_tool_calls};
pub use media::{MediaKind, render_media};
pub use parser::{BlockParser, ParsedBlock, TagKind, TagSet, parse_all};

// --- Local Models ---

pub use model_cache::{
    GenerationParams, LocalModel, ModelLoader, ModelRegistry, PieceSender, PieceStream,
    chatml_template, generation_channel,
};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, ToolCallback, ToolHandler, ToolRegistry, tool};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ContentBlock, DEFAULT_MAX_TOOL_ROUNDS, MediaSource,
    Message, MessageInput, MessageRole, MessageType, StopReason, TextBlock, ThinkingBlock,
    ToolResultBlock, ToolUseBlock, Usage, new_message_id,
};

// --- Streaming Utilities ---

pub use utils::{PartialInputs, SseEvent, parse_arguments, parse_sse_stream};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use agent_runtime::prelude::*;`.
pub mod prelude {
    pub use crate::{
        Agent, AgentOptions, AgentOptionsBuilder, ContentBlock, Error, History, Message,
        MessageType, Provider, Result, StopReason, TaskResponse, Tool, ToolRegistry, tool,
    };
}
