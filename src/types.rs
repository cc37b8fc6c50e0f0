//! Core types for the agent runtime
//!
//! Every backend's streaming grammar is translated into [`Message`] values
//! carrying [`ContentBlock`]s. Replayable conversation state uses the smaller
//! [`MessageInput`] shape, which never carries control-plane blocks such as
//! `delta`, `usage` or `error`.

use crate::config::{self, Provider};
use crate::retry::RetryConfig;
use crate::tools::Tool;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default cap on tool rounds inside one task
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 25;

/// Options for configuring an agent
#[derive(Clone)]
pub struct AgentOptions {
    /// Which backend to talk to
    pub provider: Provider,

    /// System prompt to set the agent's behavior
    pub system_prompt: String,

    /// Extra instructions appended to each user prompt
    pub chain_of_thought: Option<String>,

    /// Model name or local model id
    pub model: String,

    /// Endpoint URL for remote providers
    pub base_url: String,

    /// API key for remote providers
    pub api_key: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Tools advertised to the model
    pub tools: Vec<Tool>,

    /// Maximum tool rounds before the auto-mode loop gives up
    pub max_tool_rounds: u32,

    /// Retry policy for opening streams
    pub retry: RetryConfig,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("provider", &self.provider)
            .field("system_prompt", &self.system_prompt)
            .field("chain_of_thought", &self.chain_of_thought)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

impl AgentOptions {
    /// Create a new builder for AgentOptions
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }

    /// Model configuration as sent to the backend; hashed into the thread id
    pub fn model_config(&self) -> Value {
        serde_json::json!({
            "provider": self.provider.as_str(),
            "model": self.model,
            "system": self.system_prompt,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "tools": self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
        })
    }
}

/// Builder for AgentOptions
#[derive(Default)]
pub struct AgentOptionsBuilder {
    provider: Option<Provider>,
    system_prompt: Option<String>,
    chain_of_thought: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    tools: Vec<Tool>,
    max_tool_rounds: Option<u32>,
    retry: Option<RetryConfig>,
}

impl std::fmt::Debug for AgentOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptionsBuilder")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("tools", &format!("{} tools", self.tools.len()))
            .finish()
    }
}

impl AgentOptionsBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn chain_of_thought(mut self, cot: impl Into<String>) -> Self {
        self.chain_of_thought = Some(cot.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = Some(rounds);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn build(self) -> Result<AgentOptions> {
        let model = self
            .model
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::config("model is required"))?;

        let provider = self.provider.unwrap_or(Provider::Anthropic);
        let base_url = match self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => config::get_base_url(provider, None),
        };
        if base_url.is_empty() && provider != Provider::Local {
            return Err(Error::config("base_url is required"));
        }

        let max_tool_rounds = self.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);
        if max_tool_rounds == 0 {
            return Err(Error::config("max_tool_rounds must be at least 1"));
        }

        Ok(AgentOptions {
            provider,
            system_prompt: self.system_prompt.unwrap_or_default(),
            chain_of_thought: self.chain_of_thought.filter(|c| !c.is_empty()),
            model,
            base_url,
            api_key: self.api_key,
            max_tokens: self.max_tokens.unwrap_or(4096),
            temperature: self.temperature,
            timeout: self.timeout.unwrap_or(600),
            tools: self.tools,
            max_tool_rounds,
            retry: self.retry.unwrap_or_default(),
        })
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    /// Whether this stop reason ends the task
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::ToolUse)
    }
}

/// Message type, mirroring the dominant content block
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    ToolUse,
    ToolResult,
    ToolCallDelta,
    Thinking,
    RedactedThinking,
    SignatureDelta,
    Delta,
    Usage,
    Error,
}

/// Where media bytes live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Content block types that can appear in messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image {
        source: MediaSource,
    },
    Audio {
        source: MediaSource,
    },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    ToolCallDelta {
        id: String,
        partial_json: String,
    },
    Thinking(ThinkingBlock),
    RedactedThinking {
        data: String,
    },
    SignatureDelta {
        signature: String,
    },
    Delta {
        stop_reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_sequence: Option<String>,
    },
    Usage(Usage),
    Error {
        message: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock::new(text))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ContentBlock::Error {
            message: message.into(),
        }
    }

    /// The `error` block reporting a generation cut off by the token budget
    pub fn max_tokens() -> Self {
        ContentBlock::error(Error::MaxTokens.to_string())
    }

    pub fn delta(stop_reason: StopReason) -> Self {
        ContentBlock::Delta {
            stop_reason,
            stop_sequence: None,
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            ContentBlock::Text(_) => MessageType::Text,
            ContentBlock::Image { .. } => MessageType::Image,
            ContentBlock::Audio { .. } => MessageType::Audio,
            ContentBlock::ToolUse(_) => MessageType::ToolUse,
            ContentBlock::ToolResult(_) => MessageType::ToolResult,
            ContentBlock::ToolCallDelta { .. } => MessageType::ToolCallDelta,
            ContentBlock::Thinking(_) => MessageType::Thinking,
            ContentBlock::RedactedThinking { .. } => MessageType::RedactedThinking,
            ContentBlock::SignatureDelta { .. } => MessageType::SignatureDelta,
            ContentBlock::Delta { .. } => MessageType::Delta,
            ContentBlock::Usage(_) => MessageType::Usage,
            ContentBlock::Error { .. } => MessageType::Error,
        }
    }

    /// Blocks that may be stored in history and replayed to a backend
    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            ContentBlock::Text(_)
                | ContentBlock::Image { .. }
                | ContentBlock::Audio { .. }
                | ContentBlock::ToolUse(_)
                | ContentBlock::ToolResult(_)
                | ContentBlock::Thinking(_)
                | ContentBlock::RedactedThinking { .. }
        )
    }

    fn validate(&self) -> Result<()> {
        match self {
            ContentBlock::ToolUse(tool_use) => {
                if tool_use.id.is_empty() || tool_use.name.is_empty() {
                    return Err(Error::validation("tool_use requires an id and a name"));
                }
            }
            ContentBlock::ToolResult(result) => {
                if result.tool_use_id.is_empty() {
                    return Err(Error::validation("tool_result requires a tool_use_id"));
                }
            }
            block if !block.is_replayable() => {
                return Err(Error::validation(format!(
                    "{:?} blocks cannot be stored in history",
                    block.kind()
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Text content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Tool use content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Tool result block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
            name: None,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: Value::String(message.into()),
            is_error: true,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Result content flattened to text, as vendors expect it
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Model reasoning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ThinkingBlock {
    pub fn new(thinking: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
            signature: None,
        }
    }
}

impl From<ThinkingBlock> for ContentBlock {
    fn from(block: ThinkingBlock) -> Self {
        ContentBlock::Thinking(block)
    }
}

/// Token accounting
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl Usage {
    pub fn input(tokens: u64) -> Self {
        Self {
            input_tokens: Some(tokens),
            output_tokens: None,
        }
    }

    pub fn output(tokens: u64) -> Self {
        Self {
            input_tokens: None,
            output_tokens: Some(tokens),
        }
    }
}

/// A message emitted on a task stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<bool>,
}

impl Message {
    /// Build a message with a fresh id; the type follows the first non-usage block
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self::with_id(new_message_id(), role, content)
    }

    pub fn with_id(id: impl Into<String>, role: MessageRole, content: Vec<ContentBlock>) -> Self {
        let kind = dominant_kind(&content);
        Self {
            id: id.into(),
            role,
            kind,
            content,
            chunk: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![ContentBlock::text(text)])
    }

    /// Streamable text fragment sharing `id` with its siblings
    pub fn text_chunk(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_id(id, MessageRole::Assistant, vec![ContentBlock::text(text)]).chunked()
    }

    /// Streamable thinking fragment sharing `id` with its siblings
    pub fn thinking_chunk(id: impl Into<String>, thinking: impl Into<String>) -> Self {
        Self::with_id(
            id,
            MessageRole::Assistant,
            vec![ContentBlock::Thinking(ThinkingBlock::new(thinking))],
        )
        .chunked()
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::assistant(vec![ContentBlock::ToolUse(ToolUseBlock::new(id, name, input))])
    }

    pub fn tool_result(result: ToolResultBlock) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::ToolResult(result)])
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::assistant(vec![ContentBlock::error(message)])
    }

    pub fn delta(stop_reason: StopReason) -> Self {
        Self::assistant(vec![ContentBlock::delta(stop_reason)])
    }

    pub fn usage(usage: Usage) -> Self {
        Self::assistant(vec![ContentBlock::Usage(usage)])
    }

    pub fn chunked(mut self) -> Self {
        self.chunk = Some(true);
        self
    }

    pub fn is_chunk(&self) -> bool {
        self.chunk.unwrap_or(false)
    }

    /// Recompute `kind` after the content changed
    pub fn refresh_kind(&mut self) {
        self.kind = dominant_kind(&self.content);
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Stop reason of the first `delta` block, if any
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Delta { stop_reason, .. } => Some(*stop_reason),
            _ => None,
        })
    }

    pub fn is_error(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::Error { .. }))
    }

    /// Text of the first `error` block, if any
    pub fn error_message(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Error { message } => Some(message.as_str()),
            _ => None,
        })
    }

    /// Whether this message reports a `max_tokens` cut-off, which ends the
    /// turn like a terminal delta
    pub fn is_max_tokens(&self) -> bool {
        self.content
            .iter()
            .any(|block| *block == ContentBlock::max_tokens())
    }

    /// Whether a consumer may stop reading after this message
    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.stop_reason().is_some_and(|r| r.is_terminal())
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        })
    }
}

fn dominant_kind(content: &[ContentBlock]) -> MessageType {
    content
        .iter()
        .find(|block| !matches!(block, ContentBlock::Usage(_)))
        .or_else(|| content.first())
        .map(ContentBlock::kind)
        .unwrap_or(MessageType::Text)
}

/// Fresh id for a message or a coalesced block
pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// A history entry: the replayable subset of a [`Message`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageInput {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl MessageInput {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Keep only the replayable blocks of a stream message
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message
                .content
                .iter()
                .filter(|block| block.is_replayable())
                .cloned()
                .collect(),
        }
    }

    /// Parse and validate one replayed JSON entry
    pub fn from_value(value: Value) -> Result<Self> {
        let input: MessageInput = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("malformed history entry: {}", e)))?;
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::validation("history entry has no content"));
        }
        for block in &self.content {
            block.validate()?;
        }
        Ok(())
    }

    pub fn has_tool_result(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolResult(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_options_builder() {
        let options = AgentOptions::builder()
            .provider(Provider::OpenAi)
            .system_prompt("Test prompt")
            .model("test-model")
            .base_url("http://localhost:1234/v1/")
            .api_key("test-key")
            .max_tokens(1000)
            .temperature(0.5)
            .timeout(30)
            .max_tool_rounds(3)
            .build()
            .unwrap();

        assert_eq!(options.provider, Provider::OpenAi);
        assert_eq!(options.system_prompt, "Test prompt");
        assert_eq!(options.model, "test-model");
        assert_eq!(options.base_url, "http://localhost:1234/v1");
        assert_eq!(options.api_key.as_deref(), Some("test-key"));
        assert_eq!(options.max_tokens, 1000);
        assert_eq!(options.temperature, Some(0.5));
        assert_eq!(options.timeout, 30);
        assert_eq!(options.max_tool_rounds, 3);
    }

    #[test]
    fn test_agent_options_builder_defaults() {
        let options = AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234")
            .build()
            .unwrap();

        assert_eq!(options.provider, Provider::Anthropic);
        assert_eq!(options.system_prompt, "");
        assert_eq!(options.api_key, None);
        assert_eq!(options.max_tokens, 4096);
        assert_eq!(options.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(options.retry.max_attempts, 10);
    }

    #[test]
    fn test_agent_options_builder_missing_model() {
        let result = AgentOptions::builder()
            .base_url("http://localhost:1234/v1")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_masks_api_key() {
        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://x")
            .api_key("secret")
            .build()
            .unwrap();
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_message_kind_skips_usage() {
        let msg = Message::assistant(vec![
            ContentBlock::Usage(Usage::input(3)),
            ContentBlock::text("hi"),
        ]);
        assert_eq!(msg.kind, MessageType::Text);

        let usage_only = Message::usage(Usage::output(4));
        assert_eq!(usage_only.kind, MessageType::Usage);
    }

    #[test]
    fn test_message_serialization_shape() {
        let msg = Message::text_chunk("msg_1", "Hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "msg_1",
                "role": "assistant",
                "type": "text",
                "content": [{"type": "text", "text": "Hi"}],
                "chunk": true
            })
        );

        let plain = serde_json::to_value(Message::delta(StopReason::EndTurn)).unwrap();
        assert!(plain.get("chunk").is_none());
        assert_eq!(plain["content"][0]["stop_reason"], "end_turn");
    }

    #[test]
    fn test_terminal_messages() {
        assert!(Message::delta(StopReason::EndTurn).is_terminal());
        assert!(Message::delta(StopReason::MaxTokens).is_terminal());
        assert!(Message::delta(StopReason::StopSequence).is_terminal());
        assert!(!Message::delta(StopReason::ToolUse).is_terminal());
        assert!(Message::error("boom").is_terminal());
        assert_eq!(Message::error("boom").error_message(), Some("boom"));
        assert_eq!(Message::delta(StopReason::EndTurn).error_message(), None);
        assert!(Message::assistant(vec![ContentBlock::max_tokens()]).is_max_tokens());
        assert!(!Message::error("boom").is_max_tokens());
        assert!(!Message::user("hello").is_terminal());
    }

    #[test]
    fn test_content_block_round_trip_through_json() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "toolu_1",
            "content": {"ok": true}
        }))
        .unwrap();
        match block {
            ContentBlock::ToolResult(result) => {
                assert_eq!(result.tool_use_id, "toolu_1");
                assert!(!result.is_error);
                assert_eq!(result.name, None);
            }
            other => panic!("Expected tool_result, got {:?}", other),
        }

        let image: ContentBlock = serde_json::from_value(json!({
            "type": "image",
            "source": {"type": "url", "url": "https://example.com/a.png"}
        }))
        .unwrap();
        assert_eq!(image.kind(), MessageType::Image);
    }

    #[test]
    fn test_message_input_from_value_rejects_bad_role() {
        let err = MessageInput::from_value(json!({
            "role": "narrator",
            "content": [{"type": "text", "text": "x"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_message_input_rejects_control_blocks() {
        let err = MessageInput::from_value(json!({
            "role": "assistant",
            "content": [{"type": "usage", "input_tokens": 3}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = MessageInput::from_value(json!({
            "role": "user",
            "content": [{"type": "tool_result", "tool_use_id": "", "content": "x"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_message_input_from_message_drops_control_blocks() {
        let msg = Message::assistant(vec![
            ContentBlock::text("answer"),
            ContentBlock::Usage(Usage::output(2)),
            ContentBlock::delta(StopReason::EndTurn),
        ]);
        let input = MessageInput::from_message(&msg);
        assert_eq!(input.content, vec![ContentBlock::text("answer")]);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_tool_result_content_text() {
        let result = ToolResultBlock::new("t", json!({"a": 1}));
        assert_eq!(result.content_text(), r#"{"a":1}"#);
        let err = ToolResultBlock::error("t", "boom");
        assert!(err.is_error);
        assert_eq!(err.content_text(), "boom");
    }

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(serde_json::to_string(&MessageRole::Tool).unwrap(), "\"tool\"");
    }
}
