//! Tool loop tests over a scripted runner
//!
//! `ScriptedRunner` hands out one canned turn per `stream` call, so these
//! tests exercise the orchestrator and the agent without any network.

use agent_runtime::{
    Agent, AgentOptions, ContentBlock, Error, History, Message, MessageRole, MessageStream,
    MessageType, Provider, Result, Runner, StopReason, TaskCache, Tool, ToolCallback,
    ToolRegistry, Usage, tool,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum Turn {
    Messages(Vec<Message>),
    /// Emit these, then never finish
    Hang(Vec<Message>),
    Fail(String),
}

struct ScriptedRunner {
    history: History,
    cache: TaskCache,
    tools: Vec<Tool>,
    turns: Mutex<VecDeque<Turn>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            history: History::new(),
            cache: TaskCache::new(),
            tools: vec![tool("echo", "Echo the input").param("text", "string").build()],
            turns: Mutex::new(turns.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn cache(&self) -> &TaskCache {
        &self.cache
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn stream(
        &self,
        prompt: &str,
        chain_of_thought: Option<&str>,
        _system: &str,
    ) -> Result<MessageStream> {
        self.history.append_last_prompt(prompt, chain_of_thought);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let turn = self.turns.lock().unwrap().pop_front();
        match turn {
            Some(Turn::Messages(messages)) => Ok(Box::pin(futures::stream::iter(messages))),
            Some(Turn::Hang(messages)) => Ok(Box::pin(
                futures::stream::iter(messages).chain(futures::stream::pending()),
            )),
            Some(Turn::Fail(reason)) => Err(Error::api(reason)),
            None => Err(Error::api("script exhausted")),
        }
    }
}

fn agent_over(runner: Arc<ScriptedRunner>) -> Agent {
    let options = AgentOptions::builder()
        .provider(Provider::Local)
        .model("scripted")
        .build()
        .unwrap();
    Agent::with_runner(options, runner, CancellationToken::new())
}

fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        tool("echo", "Echo the input").param("text", "string").build(),
        |args| async move { Ok(json!({"echo": args["text"]})) },
    );
    registry
}

fn tool_turn(calls: &[(&str, &str)]) -> Turn {
    let mut messages: Vec<Message> = calls
        .iter()
        .map(|(id, text)| Message::tool_use(*id, "echo", json!({"text": text})))
        .collect();
    messages.push(Message::delta(StopReason::ToolUse));
    messages.push(Message::usage(Usage::output(2)));
    Turn::Messages(messages)
}

fn text_turn(text: &str) -> Turn {
    Turn::Messages(vec![
        Message::usage(Usage::input(5)),
        Message::text_chunk("msg_answer", text),
        Message::delta(StopReason::EndTurn),
        Message::usage(Usage::output(1)),
    ])
}

fn tool_results(messages: &[Message]) -> Vec<agent_runtime::ToolResultBlock> {
    messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|b| match b {
            ContentBlock::ToolResult(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_every_tool_use_gets_exactly_one_result() {
    let runner = ScriptedRunner::new(vec![
        tool_turn(&[("t1", "a"), ("t2", "b")]),
        text_turn("done"),
    ]);
    let agent = agent_over(runner.clone()).tool_registry(&echo_registry());

    let task = agent.perform_task("echo twice").await;
    let messages: Vec<Message> = task.stream.collect().await;

    let kinds: Vec<MessageType> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageType::ToolUse,
            MessageType::ToolUse,
            MessageType::Delta,
            MessageType::Usage,
            MessageType::ToolResult,
            MessageType::ToolResult,
            MessageType::Usage,
            MessageType::Text,
            MessageType::Delta,
            MessageType::Usage,
        ]
    );

    let results = tool_results(&messages);
    let ids: Vec<&str> = results.iter().map(|r| r.tool_use_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert_eq!(results[1].content, json!({"echo": "b"}));
    assert!(results.iter().all(|r| !r.is_error));

    // The resumed round opens with an empty prompt.
    assert_eq!(runner.prompts(), vec!["echo twice".to_string(), String::new()]);
    assert_eq!(task.usage.input_tokens(), 5);
    assert_eq!(task.usage.output_tokens(), 3);

    let history = agent.history().snapshot();
    let roles: Vec<MessageRole> = history.iter().map(|e| e.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::User,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(history[5].content, vec![ContentBlock::text("done")]);
}

#[tokio::test]
async fn test_missing_handler_yields_error_result() {
    let runner = ScriptedRunner::new(vec![tool_turn(&[("t1", "a")]), text_turn("ok")]);
    let agent = agent_over(runner);

    let messages: Vec<Message> = agent.perform_task("go").await.stream.collect().await;
    let results = tool_results(&messages);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error);
    assert!(results[0].content_text().contains("echo"));
    assert_eq!(messages.last().unwrap().kind, MessageType::Usage);
}

#[tokio::test]
async fn test_open_failure_is_a_single_error_message() {
    let runner = ScriptedRunner::new(vec![Turn::Fail("503 unavailable".into())]);
    let agent = agent_over(runner);

    let messages: Vec<Message> = agent.perform_task("hi").await.stream.collect().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_error());
}

#[tokio::test]
async fn test_resume_failure_ends_task_with_error() {
    let runner = ScriptedRunner::new(vec![tool_turn(&[("t1", "a")])]);
    let agent = agent_over(runner).tool_registry(&echo_registry());

    let messages: Vec<Message> = agent.perform_task("go").await.stream.collect().await;
    assert_eq!(tool_results(&messages).len(), 1);
    let last = messages.last().unwrap();
    assert!(last.is_error());
    assert!(
        last.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Error { message } if message.contains("script exhausted")))
    );
}

#[tokio::test]
async fn test_usage_is_isolated_per_task() {
    let runner = ScriptedRunner::new(vec![text_turn("one"), text_turn("two")]);
    let agent = agent_over(runner);

    let first = agent.perform_task("first").await;
    let _: Vec<Message> = first.stream.collect().await;
    let second = agent.perform_task("second").await;
    let _: Vec<Message> = second.stream.collect().await;

    assert_eq!(first.usage.input_tokens(), 5);
    assert_eq!(first.usage.output_tokens(), 1);
    assert_eq!(second.usage.input_tokens(), 5);
    assert_eq!(second.usage.output_tokens(), 1);
    assert_eq!(agent.history().len(), 4);
}

#[tokio::test]
async fn test_cancel_while_streaming_ends_stream() {
    let runner = ScriptedRunner::new(vec![Turn::Hang(vec![Message::text_chunk(
        "msg_1", "partial",
    )])]);
    let agent = agent_over(runner);
    let cancel = agent.cancellation_token();

    let mut stream = agent.perform_task("hang").await.stream;
    let first = stream.next().await.unwrap();
    assert_eq!(first.text(), "partial");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let rest = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("stream ends after cancel");
    assert!(rest.is_empty());

    // A cancelled agent stays cancelled.
    let after: Vec<Message> = agent.perform_task("again").await.stream.collect().await;
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_cancel_during_tool_call_stops_dispatch() {
    let runner = ScriptedRunner::new(vec![
        tool_turn(&[("t1", "a"), ("t2", "b")]),
        text_turn("unreachable"),
    ]);
    let agent = agent_over(runner.clone());
    let token = agent.cancellation_token();

    let callback: ToolCallback = Arc::new(
        move |_message: Message, cancel: CancellationToken| -> BoxFuture<'static, Result<()>> {
            let token = token.clone();
            Box::pin(async move {
                token.cancel();
                cancel.cancelled().await;
                Err(Error::Cancelled)
            })
        },
    );
    let agent = agent.on_tool_use(callback);

    let messages: Vec<Message> = tokio::time::timeout(
        Duration::from_secs(5),
        agent.perform_task("go").await.stream.collect::<Vec<_>>(),
    )
    .await
    .expect("task ends after cancel");

    assert!(tool_results(&messages).is_empty());
    assert!(messages.iter().all(|m| !m.is_error()));
    assert_eq!(runner.prompts().len(), 1);

    // Both queued calls are still answered in history.
    let history = agent.history();
    for id in ["t1", "t2"] {
        let result = history.tool_result_for(id).expect("cancelled result recorded");
        assert!(result.is_error);
        assert_eq!(result.content_text(), "Operation cancelled");
    }
}

#[tokio::test]
async fn test_max_tokens_with_queued_tool_use_ends_task() {
    let runner = ScriptedRunner::new(vec![
        Turn::Messages(vec![
            Message::tool_use("t1", "echo", json!({})),
            Message::assistant(vec![ContentBlock::ToolCallDelta {
                id: "t1".into(),
                partial_json: r#"{"text": "a"#.into(),
            }]),
            Message::assistant(vec![ContentBlock::max_tokens()]),
            Message::usage(Usage::output(8)),
        ]),
        text_turn("unreachable"),
    ]);
    let agent = agent_over(runner.clone()).tool_registry(&echo_registry());

    let task = agent.perform_task("go").await;
    let messages: Vec<Message> = task.stream.collect().await;

    let kinds: Vec<MessageType> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageType::ToolUse,
            MessageType::ToolCallDelta,
            MessageType::Error,
            MessageType::Usage,
        ]
    );
    assert!(tool_results(&messages).is_empty());
    assert_eq!(runner.prompts(), vec!["go".to_string()]);
    assert_eq!(task.usage.output_tokens(), 8);
}

#[tokio::test]
async fn test_chunk_error_does_not_stop_dispatch() {
    let runner = ScriptedRunner::new(vec![
        Turn::Messages(vec![
            Message::tool_use("t1", "echo", json!({"text": "a"})),
            Message::error("Streaming error: input delta for unknown block 3"),
            Message::delta(StopReason::ToolUse),
        ]),
        text_turn("after"),
    ]);
    let agent = agent_over(runner.clone()).tool_registry(&echo_registry());

    let messages: Vec<Message> = agent.perform_task("go").await.stream.collect().await;
    let results = tool_results(&messages);
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error);
    assert_eq!(runner.prompts().len(), 2);
    let text: String = messages.iter().map(|m| m.text()).collect();
    assert_eq!(text, "after");
}
