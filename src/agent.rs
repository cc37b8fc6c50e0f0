//! Agent façade
//!
//! An [`Agent`] binds one runner, the system prompt and chain of thought,
//! and the callback that executes tools. [`Agent::perform_task`] is the
//! whole public surface of a task: it never fails, it returns a stream.
//!
//! ```rust,no_run
//! use agent_runtime::{Agent, AgentOptions, MessageType, ToolRegistry, tool};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! # async fn example() -> agent_runtime::Result<()> {
//! let weather = tool("get_weather", "Current weather").param("city", "string").build();
//! let mut registry = ToolRegistry::new();
//! registry.register(weather.clone(), |args| async move {
//!     Ok(json!({"city": args["city"], "temp_c": 21}))
//! });
//!
//! let options = AgentOptions::builder()
//!     .model("claude-3-5-sonnet-latest")
//!     .system_prompt("You are terse.")
//!     .tool(weather)
//!     .build()?;
//! let agent = Agent::new(options)?.tool_registry(&registry);
//!
//! let mut task = agent.perform_task("Weather in Paris?").await;
//! while let Some(message) = task.stream.next().await {
//!     if message.kind == MessageType::Text {
//!         print!("{}", message.text());
//!     }
//! }
//! println!("\n{} output tokens", task.usage.output_tokens());
//! # Ok(())
//! # }
//! ```

use crate::history::History;
use crate::model_cache::ModelRegistry;
use crate::orchestrator::Orchestrator;
use crate::runner::{MessageStream, Runner, UsageCounter, create_runner};
use crate::tools::{ToolCallback, ToolRegistry};
use crate::types::{AgentOptions, Message};
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The result of [`Agent::perform_task`]
pub struct TaskResponse {
    /// Token totals for this task; filled in while the stream is read
    pub usage: UsageCounter,

    /// Every message of the task, tool rounds included
    pub stream: MessageStream,
}

impl std::fmt::Debug for TaskResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskResponse")
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

/// One conversation with one backend
pub struct Agent {
    options: AgentOptions,
    runner: Arc<dyn Runner>,
    history: History,
    cancel: CancellationToken,
    callback: ToolCallback,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("options", &self.options)
            .field("history_len", &self.history.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Agent {
    /// Agent for a remote provider
    pub fn new(options: AgentOptions) -> Result<Self> {
        Self::build(options, None)
    }

    /// Agent that may use in-process models from `models`
    pub fn with_models(options: AgentOptions, models: Arc<ModelRegistry>) -> Result<Self> {
        Self::build(options, Some(models))
    }

    fn build(options: AgentOptions, models: Option<Arc<ModelRegistry>>) -> Result<Self> {
        let history = History::new();
        let cancel = CancellationToken::new();
        let runner = create_runner(&options, history.clone(), cancel.clone(), models)?;
        Ok(Self::with_runner(options, runner, cancel))
    }

    /// Agent over an existing runner; `cancel` must be the token the runner
    /// was created with
    pub fn with_runner(
        options: AgentOptions,
        runner: Arc<dyn Runner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            history: runner.history().clone(),
            options,
            runner,
            cancel,
            callback: missing_handler(),
        }
    }

    /// Replace the tool callback
    pub fn on_tool_use(mut self, callback: ToolCallback) -> Self {
        self.callback = callback;
        self
    }

    pub fn set_tool_callback(&mut self, callback: ToolCallback) {
        self.callback = callback;
    }

    /// Execute tools through `registry`, recording results in this agent's
    /// history
    pub fn tool_registry(self, registry: &ToolRegistry) -> Self {
        let callback = registry.callback(self.history.clone());
        self.on_tool_use(callback)
    }

    /// Run one task to completion.
    ///
    /// Failures to open the first stream arrive as a single `error`
    /// message; a cancelled agent yields an empty stream.
    pub async fn perform_task(&self, prompt: &str) -> TaskResponse {
        let cache = self.runner.cache();
        cache.reset();
        let usage = cache.usage();

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            opened = self.runner.stream(
                prompt,
                self.options.chain_of_thought.as_deref(),
                &self.options.system_prompt,
            ) => opened,
        };

        let stream: MessageStream = match opened {
            Ok(first) => Orchestrator {
                runner: self.runner.clone(),
                callback: self.callback.clone(),
                cancel: self.cancel.clone(),
                system: self.options.system_prompt.clone(),
                max_tool_rounds: self.options.max_tool_rounds,
            }
            .run(first),
            Err(Error::Cancelled) => Box::pin(futures::stream::empty()),
            Err(e) => {
                log::warn!("failed to open {} stream: {}", self.runner.provider(), e);
                Box::pin(futures::stream::iter(vec![Message::error(e.to_string())]))
            }
        };

        TaskResponse { usage, stream }
    }

    /// Stop the running task and every later one
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn runner(&self) -> &Arc<dyn Runner> {
        &self.runner
    }
}

/// Default callback: every tool use gets an `is_error` result
fn missing_handler() -> ToolCallback {
    Arc::new(|message: Message, _cancel: CancellationToken| -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            Err(Error::tool(match message.tool_uses().next() {
                Some(tool_use) => format!("no tool handler registered for {}", tool_use.name),
                None => "no tool handler registered".to_string(),
            }))
        })
    })
}
