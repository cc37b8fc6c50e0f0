//! Backend adapters
//!
//! A [`Runner`] opens one model stream per call and translates the backend's
//! grammar into canonical [`Message`]s. Three implementations exist:
//!
//! - [`AnthropicRunner`]: Messages-style SSE API
//! - [`OpenAiRunner`]: Responses-style SSE API
//! - [`LocalRunner`]: in-process generation through a [`ModelRegistry`]
//!
//! Every runner shares the agent's [`History`], keeps a per-task
//! [`TaskCache`], and holds the cancellation token it was created with.
//! Before its first request a runner appends the user prompt to history
//! (idempotently), so calling `stream("", ..)` simply resumes the
//! conversation after a tool round.

pub mod anthropic;
pub mod local;
pub mod openai;

pub use anthropic::AnthropicRunner;
pub use local::LocalRunner;
pub use openai::OpenAiRunner;

use crate::config::{self, Provider};
use crate::history::History;
use crate::model_cache::ModelRegistry;
use crate::retry::{RetryConfig, retry_with_backoff_conditional};
use crate::tools::Tool;
use crate::types::{AgentOptions, Message, Usage, new_message_id};
use crate::utils::PartialInputs;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stream of canonical messages
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Backend adapter contract
#[async_trait]
pub trait Runner: Send + Sync {
    fn provider(&self) -> Provider;

    /// The conversation this runner replays on every request
    fn history(&self) -> &History;

    fn cache(&self) -> &TaskCache;

    /// Tools advertised to the model
    fn tools(&self) -> &[Tool];

    /// Open a generation stream.
    ///
    /// `prompt` (plus `chain_of_thought`) is appended to history first unless
    /// it is already the newest user text; an empty prompt appends nothing.
    async fn stream(
        &self,
        prompt: &str,
        chain_of_thought: Option<&str>,
        system: &str,
    ) -> Result<MessageStream>;
}

/// Running token totals for one task; clones share the counts
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    input: Arc<AtomicU64>,
    output: Arc<AtomicU64>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &Usage) {
        if let Some(tokens) = usage.input_tokens {
            self.input.fetch_add(tokens, Ordering::Relaxed);
        }
        if let Some(tokens) = usage.output_tokens {
            self.output.fetch_add(tokens, Ordering::Relaxed);
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Usage {
        Usage {
            input_tokens: Some(self.input_tokens()),
            output_tokens: Some(self.output_tokens()),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    partial_inputs: PartialInputs,
    block_id: Option<String>,
    usage: UsageCounter,
}

/// Per-task adapter state: streamed tool input, usage totals and the id
/// shared by chunks of the current text or thinking block
#[derive(Debug, Clone, Default)]
pub struct TaskCache {
    state: Arc<Mutex<CacheState>>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a fresh task: drop partial input and begin a new usage counter
    pub fn reset(&self) {
        *self.lock() = CacheState::default();
    }

    pub fn push_partial(&self, tool_use_id: &str, fragment: &str) {
        self.lock().partial_inputs.push(tool_use_id, fragment);
    }

    /// Parsed input streamed for a tool use, if any was streamed
    pub fn take_partial(&self, tool_use_id: &str) -> Option<Value> {
        self.lock().partial_inputs.take(tool_use_id)
    }

    /// Begin a new coalesced block and return its id
    pub fn begin_block(&self) -> String {
        let id = new_message_id();
        self.lock().block_id = Some(id.clone());
        id
    }

    /// Id of the current coalesced block, starting one if needed
    pub fn block_id(&self) -> String {
        let mut state = self.lock();
        state.block_id.get_or_insert_with(new_message_id).clone()
    }

    pub fn end_block(&self) {
        self.lock().block_id = None;
    }

    pub fn usage(&self) -> UsageCounter {
        self.lock().usage.clone()
    }

    pub fn record_usage(&self, usage: &Usage) {
        self.lock().usage.record(usage);
    }
}

/// Build the runner for `options.provider`.
///
/// `models` is only consulted for [`Provider::Local`], which fails without
/// one.
pub fn create_runner(
    options: &AgentOptions,
    history: History,
    cancel: CancellationToken,
    models: Option<Arc<ModelRegistry>>,
) -> Result<Arc<dyn Runner>> {
    log::debug!(
        "creating {} runner for model {}",
        options.provider,
        options.model
    );
    match options.provider {
        Provider::Anthropic => Ok(Arc::new(AnthropicRunner::new(options, history, cancel)?)),
        Provider::OpenAi => Ok(Arc::new(OpenAiRunner::new(options, history, cancel)?)),
        Provider::Local => {
            let models = models.ok_or_else(|| {
                Error::config("the local provider needs a model registry")
            })?;
            Ok(Arc::new(LocalRunner::new(options, history, cancel, models)?))
        }
    }
}

pub(crate) fn http_client(timeout: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(Error::Http)
}

pub(crate) fn api_key(options: &AgentOptions) -> Result<String> {
    config::get_api_key(options.provider, options.api_key.as_deref()).ok_or_else(|| {
        Error::config(format!(
            "no API key for {}; set {}",
            options.provider,
            options.provider.api_key_env().unwrap_or("api_key")
        ))
    })
}

/// Send a request, retrying connection failures, and reject non-success
/// statuses with the response body as the message
pub(crate) async fn send_with_retry<F>(
    retry: &RetryConfig,
    cancel: &CancellationToken,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let attempts = retry_with_backoff_conditional(retry.clone(), || {
        let request = build();
        async move { request.send().await.map_err(Error::from_send) }
    });

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = attempts => response?,
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::api(format!("{}: {}", status, body)))
}
