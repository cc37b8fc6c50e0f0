//! In-process models and the shared registry that loads them.
//!
//! The runtime does not ship an inference engine. A host plugs one in by
//! implementing [`LocalModel`] (template, tokenizer, generation) and a
//! [`ModelLoader`] that builds models by id. [`ModelRegistry`] is the only
//! state shared between tasks: each model id is loaded at most once, even
//! when several tasks ask for it concurrently.

use crate::history::collapse_thinking;
use crate::parser::TagSet;
use crate::tools::Tool;
use crate::types::{ContentBlock, MediaSource, MessageInput, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::fmt::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OnceCell, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Generated text pieces, in order
pub type PieceStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Sending half of [`generation_channel`]
pub type PieceSender = mpsc::Sender<Result<String>>;

/// Sampling parameters for one generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// An in-process model
pub trait LocalModel: Send + Sync {
    fn id(&self) -> &str;

    /// Render the conversation into the model's prompt format.
    ///
    /// Defaults to ChatML with tool definitions in the system turn.
    fn apply_chat_template(&self, system: &str, history: &[MessageInput], tools: &[Tool]) -> String {
        chatml_template(system, history, tools)
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Start generating from `tokens`. The stream must end when `cancel`
    /// fires.
    fn generate(
        &self,
        tokens: Vec<u32>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<PieceStream>;

    /// Tags this model writes around reasoning, tool calls and media
    fn tag_set(&self) -> TagSet {
        TagSet::standard()
    }
}

/// Builds models by id
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn LocalModel>>;
}

type ModelSlot = Arc<OnceCell<Arc<dyn LocalModel>>>;

/// Init-once cache of loaded models, shared across tasks
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    models: Mutex<HashMap<String, ModelSlot>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaded", &self.loaded_ids())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// A registry serving exactly these models; other ids fail to load
    pub fn with_models(models: Vec<Arc<dyn LocalModel>>) -> Self {
        let registry = Self::new(Arc::new(NoLoader));
        {
            let mut slots = registry.slots();
            for model in models {
                slots.insert(
                    model.id().to_string(),
                    Arc::new(OnceCell::new_with(Some(model))),
                );
            }
        }
        registry
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, ModelSlot>> {
        self.models.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, model_id: &str) -> ModelSlot {
        self.slots()
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Return the model, loading it on first use.
    ///
    /// Concurrent callers for the same id wait on one load. A failed load
    /// leaves the slot empty so a later call can try again.
    pub async fn get_or_load(&self, model_id: &str) -> Result<Arc<dyn LocalModel>> {
        let slot = self.slot(model_id);
        let model = slot
            .get_or_try_init(|| async {
                log::debug!("loading local model {}", model_id);
                self.loader.load(model_id).await
            })
            .await?;
        Ok(model.clone())
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.slots()
            .get(model_id)
            .is_some_and(|slot| slot.initialized())
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

struct NoLoader;

#[async_trait]
impl ModelLoader for NoLoader {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn LocalModel>> {
        Err(Error::config(format!("unknown local model: {}", model_id)))
    }
}

/// Channel for engines that generate on a blocking thread.
///
/// The engine pushes pieces with `blocking_send`; the stream half is what
/// [`LocalModel::generate`] returns.
pub fn generation_channel(capacity: usize) -> (PieceSender, PieceStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Box::pin(ReceiverStream::new(rx)))
}

/// ChatML rendering with tool definitions and `<tool_call>` instructions
pub fn chatml_template(system: &str, history: &[MessageInput], tools: &[Tool]) -> String {
    let mut prompt = String::new();

    let mut system_turn = system.to_string();
    if !tools.is_empty() {
        if !system_turn.is_empty() {
            system_turn.push_str("\n\n");
        }
        system_turn.push_str(
            "# Tools\n\nYou may call one or more functions. Function signatures:\n<tools>\n",
        );
        for tool in tools {
            let definition = serde_json::json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.input_schema(),
            });
            let _ = writeln!(system_turn, "{}", definition);
        }
        system_turn.push_str(
            "</tools>\n\nFor each call, write \
             <tool_call>{\"name\": <function-name>, \"arguments\": <args-json-object>}</tool_call>",
        );
    }
    if !system_turn.is_empty() {
        push_turn(&mut prompt, "system", &system_turn);
    }

    for entry in history {
        let role = match entry.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let mut body = String::new();
        let mut results = String::new();
        for block in collapse_thinking(&entry.content) {
            match block {
                ContentBlock::Text(t) => body.push_str(&t.text),
                ContentBlock::Thinking(t) => {
                    let _ = write!(body, "<think>{}</think>", t.thinking);
                }
                ContentBlock::ToolUse(t) => {
                    let call = serde_json::json!({"name": t.name, "arguments": t.input});
                    let _ = write!(body, "<tool_call>{}</tool_call>", call);
                }
                ContentBlock::ToolResult(r) => {
                    let _ = write!(results, "<tool_response>{}</tool_response>", r.content_text());
                }
                ContentBlock::Image { source: MediaSource::Url { url } } => {
                    let _ = write!(body, "<image>{}</image>", url);
                }
                ContentBlock::Audio { source: MediaSource::Url { url } } => {
                    let _ = write!(body, "<audio>{}</audio>", url);
                }
                ContentBlock::Image { .. } => body.push_str("[image]"),
                ContentBlock::Audio { .. } => body.push_str("[audio]"),
                _ => {}
            }
        }
        if !results.is_empty() {
            push_turn(&mut prompt, "tool", &results);
        }
        if !body.is_empty() {
            push_turn(&mut prompt, role, &body);
        }
    }

    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn push_turn(prompt: &mut String, role: &str, body: &str) {
    let _ = write!(prompt, "<|im_start|>{}\n{}<|im_end|>\n", role, body);
}
