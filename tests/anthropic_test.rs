//! Messages-API adapter tests
//!
//! Each test serves a canned SSE body from a wiremock server and drives a
//! whole task through `Agent::perform_task`.

use agent_runtime::retry::RetryConfig;
use agent_runtime::{
    Agent, AgentOptions, ContentBlock, Message, MessageRole, MessageType, Provider, StopReason,
    ToolRegistry, Usage, tool,
};
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

fn sse(events: &[(&str, Value)]) -> String {
    events
        .iter()
        .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
        .collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn options(base_url: &str) -> agent_runtime::AgentOptionsBuilder {
    AgentOptions::builder()
        .provider(Provider::Anthropic)
        .model("claude-test")
        .base_url(base_url)
        .api_key("test-key")
        .retry(
            RetryConfig::new()
                .with_max_attempts(2)
                .with_initial_delay(Duration::from_millis(10)),
        )
}

fn text_turn(text: &str, input: u64, output: u64) -> String {
    sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"id": "msg_01", "usage": {"input_tokens": input, "output_tokens": 1}}}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        ("ping", json!({"type": "ping"})),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
        ),
        (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": output}}),
        ),
        ("message_stop", json!({"type": "message_stop"})),
    ])
}

#[tokio::test]
async fn test_text_turn_end_to_end() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(sse_response(text_turn("Hi", 10, 3)))
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent::new(options(&server.uri()).build().unwrap()).unwrap();
    let task = agent.perform_task("Hello").await;
    let messages: Vec<Message> = task.stream.collect().await;

    let kinds: Vec<MessageType> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageType::Usage,
            MessageType::Text,
            MessageType::Delta,
            MessageType::Usage,
        ]
    );
    assert_eq!(messages[0].content, vec![ContentBlock::Usage(Usage::input(10))]);
    assert_eq!(messages[1].text(), "Hi");
    assert!(messages[1].is_chunk());
    assert_eq!(messages[2].stop_reason(), Some(StopReason::EndTurn));
    assert_eq!(messages[3].content, vec![ContentBlock::Usage(Usage::output(3))]);

    assert_eq!(task.usage.input_tokens(), 10);
    assert_eq!(task.usage.output_tokens(), 3);

    let history = agent.history().snapshot();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].content, vec![ContentBlock::text("Hi")]);
}

#[tokio::test]
async fn test_chunks_of_one_block_share_an_id() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Let me "}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "think."}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "sig"}}),
        ),
        (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": "A"}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "B"}}),
        ),
        (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 1}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let agent = Agent::new(options(&server.uri()).build().unwrap()).unwrap();
    let messages: Vec<Message> = agent.perform_task("Why?").await.stream.collect().await;

    let thinking: Vec<&Message> = messages
        .iter()
        .filter(|m| m.kind == MessageType::Thinking)
        .collect();
    let text: Vec<&Message> = messages
        .iter()
        .filter(|m| m.kind == MessageType::Text)
        .collect();
    assert_eq!(thinking.len(), 2);
    assert_eq!(thinking[0].id, thinking[1].id);
    assert_eq!(text.len(), 2);
    assert_eq!(text[0].id, text[1].id);
    assert_ne!(text[0].id, thinking[0].id);

    let history = agent.history().snapshot();
    assert_eq!(
        history[1].content,
        vec![ContentBlock::Thinking(agent_runtime::ThinkingBlock {
            thinking: "Let me think.".into(),
            signature: Some("sig".into()),
        })]
    );
    assert_eq!(history[2].content, vec![ContentBlock::text("AB")]);
}

#[tokio::test]
async fn test_tool_round_resumes_with_result() {
    init_logging();
    let server = MockServer::start().await;

    let tool_turn = sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 20}}}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {}}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"city\": "}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "\"Paris\"}"}}),
        ),
        (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 5}}),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(tool_turn))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(text_turn("It is sunny.", 30, 4)))
        .mount(&server)
        .await;

    let weather = tool("get_weather", "Current weather")
        .param("city", "string")
        .build();
    let mut registry = ToolRegistry::new();
    registry.register(weather.clone(), |args| async move {
        Ok(json!({"city": args["city"], "sky": "sunny"}))
    });

    let options = options(&server.uri()).tool(weather).build().unwrap();
    let agent = Agent::new(options).unwrap().tool_registry(&registry);
    let task = agent.perform_task("Weather in Paris?").await;
    let messages: Vec<Message> = task.stream.collect().await;

    let tool_use = messages
        .iter()
        .find(|m| m.kind == MessageType::ToolUse)
        .expect("tool_use forwarded");
    assert_eq!(tool_use.tool_uses().next().unwrap().name, "get_weather");

    let result = messages
        .iter()
        .find_map(|m| match m.content.first() {
            Some(ContentBlock::ToolResult(r)) => Some(r.clone()),
            _ => None,
        })
        .expect("tool_result forwarded");
    assert_eq!(result.tool_use_id, "toolu_01");
    assert!(!result.is_error);
    assert_eq!(result.content["sky"], "sunny");

    let deltas: Vec<StopReason> = messages.iter().filter_map(|m| m.stop_reason()).collect();
    assert_eq!(deltas, vec![StopReason::ToolUse, StopReason::EndTurn]);
    assert_eq!(messages.last().unwrap().kind, MessageType::Usage);

    assert_eq!(task.usage.input_tokens(), 50);
    assert_eq!(task.usage.output_tokens(), 9);

    // The resumed request replays the tool use with its streamed input and
    // the result as user content.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let replay = body["messages"].as_array().unwrap();
    assert_eq!(replay[1]["role"], "assistant");
    assert_eq!(replay[1]["content"][0]["type"], "tool_use");
    assert_eq!(replay[1]["content"][0]["input"], json!({"city": "Paris"}));
    assert_eq!(replay[2]["role"], "user");
    assert_eq!(replay[2]["content"][0]["type"], "tool_result");
    assert_eq!(replay[2]["content"][0]["tool_use_id"], "toolu_01");
    assert_eq!(body["tools"][0]["name"], "get_weather");
}

#[tokio::test]
async fn test_max_tokens_is_an_error_with_usage() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Once upon"}}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {"output_tokens": 2}}),
        ),
    ]);
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let agent = Agent::new(options(&server.uri()).max_tokens(2).build().unwrap()).unwrap();
    let messages: Vec<Message> = agent.perform_task("Tell a story").await.stream.collect().await;

    let error = messages.iter().find(|m| m.is_error()).expect("error message");
    assert!(
        error.content.iter().all(|b| !matches!(b, ContentBlock::Usage(_))),
        "usage is split into its own message"
    );
    assert_eq!(messages.last().unwrap().kind, MessageType::Usage);
    assert!(messages.iter().all(|m| m.kind != MessageType::Delta));
}

#[tokio::test]
async fn test_tool_call_cut_by_max_tokens_is_not_dispatched() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {}}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"city\": \"Pa"}}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {"output_tokens": 3}}),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let weather = tool("get_weather", "Current weather")
        .param("city", "string")
        .build();
    let mut registry = ToolRegistry::new();
    registry.register(weather.clone(), |args| async move { Ok(json!({"city": args["city"]})) });

    let options = options(&server.uri()).tool(weather).max_tokens(3).build().unwrap();
    let agent = Agent::new(options).unwrap().tool_registry(&registry);
    let task = agent.perform_task("Weather in Paris?").await;
    let messages: Vec<Message> = task.stream.collect().await;

    assert!(messages.iter().any(|m| m.kind == MessageType::ToolUse));
    assert!(messages.iter().any(|m| m.is_error()));
    assert!(messages.iter().all(|m| m.kind != MessageType::ToolResult));
    assert_eq!(messages.last().unwrap().kind, MessageType::Usage);
    assert_eq!(task.usage.input_tokens(), 12);
    assert_eq!(task.usage.output_tokens(), 3);
}

#[tokio::test]
async fn test_vendor_error_event_becomes_error_message() {
    let server = MockServer::start().await;
    let body = sse(&[(
        "error",
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    )]);
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let agent = Agent::new(options(&server.uri()).build().unwrap()).unwrap();
    let messages: Vec<Message> = agent.perform_task("Hi").await.stream.collect().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].content,
        vec![ContentBlock::error("overloaded_error: Overloaded")]
    );
}

#[tokio::test]
async fn test_http_error_is_one_error_message_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent::new(options(&server.uri()).build().unwrap()).unwrap();
    let messages: Vec<Message> = agent.perform_task("Hi").await.stream.collect().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_error());
    assert!(messages[0].content.iter().any(|b| matches!(
        b,
        ContentBlock::Error { message } if message.contains("bad request")
    )));
}

#[tokio::test]
async fn test_connection_failure_is_retried_then_reported() {
    // Nothing listens on port 1.
    let agent = Agent::new(options("http://127.0.0.1:1").build().unwrap()).unwrap();
    let started = std::time::Instant::now();
    let messages: Vec<Message> = agent.perform_task("Hi").await.stream.collect().await;

    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_error());
    assert!(started.elapsed() >= Duration::from_millis(10));
}
