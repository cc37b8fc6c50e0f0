//! Conversation history with merge-on-insert
//!
//! One [`History`] belongs to one agent. Clones are handles onto the same
//! ordered store, which is how the adapter, the orchestrator and tool
//! callbacks all see the same conversation. Entries are only appended or
//! merged; nothing here prunes.
//!
//! Merge rule: a user entry appended directly after another user entry is
//! folded into it, unless either one carries a `tool_result` block.

use crate::types::{
    ContentBlock, MessageInput, MessageRole, TextBlock, ThinkingBlock, ToolResultBlock,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, append-only conversation store
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Arc<Mutex<Vec<MessageInput>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from already validated entries
    pub fn with_entries(entries: Vec<MessageInput>) -> Self {
        let history = Self::new();
        history.append_messages(entries);
        history
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MessageInput>> {
        // Entries stay consistent even if a holder panicked mid-append.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append entries, applying the merge rule to each one
    pub fn append_messages(&self, messages: Vec<MessageInput>) {
        let mut entries = self.lock();
        for message in messages {
            push_merged(&mut entries, message);
        }
    }

    /// Replay entries from JSON, dropping invalid ones with a diagnostic.
    ///
    /// Returns how many entries were accepted.
    pub fn append_values(&self, values: Vec<Value>) -> usize {
        let mut accepted = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            match MessageInput::from_value(value) {
                Ok(input) => accepted.push(input),
                Err(e) => log::warn!("dropping history entry {}: {}", index, e),
            }
        }
        let count = accepted.len();
        self.append_messages(accepted);
        count
    }

    /// Append the user prompt (plus chain of thought) unless the newest
    /// entry already ends with exactly that text. An empty prompt is a no-op.
    pub fn append_last_prompt(&self, prompt: &str, chain_of_thought: Option<&str>) {
        if prompt.is_empty() {
            return;
        }
        let text = match chain_of_thought {
            Some(cot) if !cot.is_empty() => format!("{}\n\n{}", prompt, cot),
            _ => prompt.to_string(),
        };

        let mut entries = self.lock();
        let already_present = entries.last().is_some_and(|last| {
            last.role == MessageRole::User
                && matches!(last.content.last(), Some(ContentBlock::Text(t)) if t.text == text)
        });
        if already_present {
            return;
        }
        push_merged(&mut entries, MessageInput::user(text));
    }

    /// Record a thinking-family block.
    ///
    /// Thinking text extends the previous thinking block when it is the
    /// newest content; a signature attaches to that block.
    pub fn append_thinking(&self, block: ContentBlock) {
        let mut entries = self.lock();
        match block {
            ContentBlock::Thinking(chunk) => match last_thinking_mut(&mut entries) {
                Some(existing) => {
                    existing.thinking.push_str(&chunk.thinking);
                    if chunk.signature.is_some() {
                        existing.signature = chunk.signature;
                    }
                }
                None => push_merged(
                    &mut entries,
                    MessageInput::assistant(vec![ContentBlock::Thinking(chunk)]),
                ),
            },
            ContentBlock::SignatureDelta { signature } => match last_thinking_mut(&mut entries) {
                Some(existing) => existing
                    .signature
                    .get_or_insert_with(String::new)
                    .push_str(&signature),
                None => log::debug!("signature without a preceding thinking block, ignoring"),
            },
            block @ ContentBlock::RedactedThinking { .. } => {
                push_merged(&mut entries, MessageInput::assistant(vec![block]));
            }
            other => log::warn!("append_thinking called with {:?} block", other.kind()),
        }
    }

    /// Record model prose, extending the newest assistant text block
    pub fn append_assistant_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut entries = self.lock();
        if let Some(entry) = entries
            .last_mut()
            .filter(|entry| entry.role == MessageRole::Assistant)
        {
            if let Some(ContentBlock::Text(existing)) = entry.content.last_mut() {
                existing.text.push_str(text);
                return;
            }
        }
        push_merged(
            &mut entries,
            MessageInput::assistant(vec![ContentBlock::Text(TextBlock::new(text))]),
        );
    }

    /// Record the answer to a tool use as a user entry of its own
    pub fn append_tool_result(&self, result: ToolResultBlock) {
        self.append_messages(vec![MessageInput::new(
            MessageRole::User,
            vec![ContentBlock::ToolResult(result)],
        )]);
    }

    /// Replace the recorded input of a tool use once its arguments are known
    pub fn resolve_tool_input(&self, tool_use_id: &str, input: Value) -> bool {
        let mut entries = self.lock();
        for entry in entries.iter_mut().rev() {
            for block in entry.content.iter_mut() {
                if let ContentBlock::ToolUse(tool_use) = block {
                    if tool_use.id == tool_use_id {
                        tool_use.input = input;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Most recent result recorded for a tool use
    pub fn tool_result_for(&self, tool_use_id: &str) -> Option<ToolResultBlock> {
        let entries = self.lock();
        entries.iter().rev().find_map(|entry| {
            entry.content.iter().find_map(|block| match block {
                ContentBlock::ToolResult(result) if result.tool_use_id == tool_use_id => {
                    Some(result.clone())
                }
                _ => None,
            })
        })
    }

    /// Copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<MessageInput> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn last(&self) -> Option<MessageInput> {
        self.lock().last().cloned()
    }
}

fn last_thinking_mut(entries: &mut [MessageInput]) -> Option<&mut ThinkingBlock> {
    let entry = entries.last_mut()?;
    if entry.role != MessageRole::Assistant {
        return None;
    }
    match entry.content.last_mut() {
        Some(ContentBlock::Thinking(thinking)) => Some(thinking),
        _ => None,
    }
}

fn push_merged(entries: &mut Vec<MessageInput>, message: MessageInput) {
    if message.content.is_empty() {
        return;
    }
    if let Some(last) = entries.last_mut() {
        if last.role == MessageRole::User
            && message.role == MessageRole::User
            && !last.has_tool_result()
            && !message.has_tool_result()
        {
            last.content.extend(message.content);
            return;
        }
    }
    entries.push(message);
}

/// Merge adjacent thinking text in a replayed entry. Used when rendering
/// prompts for models that expect one reasoning block per turn.
pub fn collapse_thinking(content: &[ContentBlock]) -> Vec<ContentBlock> {
    let mut out: Vec<ContentBlock> = Vec::with_capacity(content.len());
    for block in content {
        if let (Some(ContentBlock::Thinking(prev)), ContentBlock::Thinking(next)) =
            (out.last_mut(), block)
        {
            prev.thinking.push_str(&next.thinking);
            continue;
        }
        out.push(block.clone());
    }
    out
}
