//! HTTP Transport Tests
//!
//! Anthropic and OpenAI-compatible transports against a local mock server.
//!
//! Run: cargo nextest run --test transport_http

use std::sync::Arc;
use std::time::Duration;

use llm_invoke::config::MemoryConfigProvider;
use llm_invoke::{
    AnthropicTransport, CostTracker, Error, ExponentialBackoff, FailureKind, Message, ModelClient,
    ModelRequest, OpenAiTransport, PricingTableBuilder, Transport,
};
use rust_decimal_macros::dec;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[(&str, serde_json::Value)]) -> String {
    events
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect()
}

fn client(transport: Arc<dyn Transport>, dir: &TempDir) -> ModelClient {
    ModelClient::builder()
        .transport(transport)
        .tracker(Arc::new(CostTracker::new()))
        .config(Arc::new(MemoryConfigProvider::new()))
        .pricing(PricingTableBuilder::new().with_defaults().build())
        .backoff(ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        ))
        .context_window_file(dir.path().join("context_windows.json"))
        .build()
        .unwrap()
}

fn anthropic(server: &MockServer) -> Arc<dyn Transport> {
    Arc::new(
        AnthropicTransport::new("test-key")
            .unwrap()
            .with_base_url(server.uri()),
    )
}

fn openai(server: &MockServer) -> Arc<dyn Transport> {
    Arc::new(OpenAiTransport::new("sk-test").unwrap().with_base_url(server.uri()))
}

// =============================================================================
// Anthropic
// =============================================================================

#[tokio::test]
async fn test_anthropic_streamed_reply() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 2000, "output_tokens": 1}}}),
        ),
        ("ping", json!({"type": "ping"})),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Four"}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "."}}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 1000}}),
        ),
        ("message_stop", json!({"type": "message_stop"})),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"stream": true, "system": "Answer in one word."})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(anthropic(&server), &dir);
    let request = ModelRequest::new(
        "claude-sonnet-4-5",
        vec![
            Message::system("Answer in one word."),
            Message::user("What is 2 + 2?"),
        ],
    )
    .with_stream(true);

    let reply = client.query(&request).await.unwrap();

    assert_eq!(reply.text, "Four.");
    assert_eq!(reply.usage.prompt_tokens, 2000);
    assert_eq!(reply.usage.completion_tokens, 1000);
    assert!(!reply.usage.estimated);
    // 2000 * $3/M + 1000 * $15/M
    assert_eq!(reply.charged_cost, dec!(0.021));
}

#[tokio::test]
async fn test_anthropic_non_streamed_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Four"}],
            "usage": {"input_tokens": 12, "output_tokens": 2}
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(anthropic(&server), &dir);
    let request =
        ModelRequest::new("claude-haiku-4-5", vec![Message::user("2 + 2?")]).with_stream(false);

    let reply = client.query(&request).await.unwrap();
    assert_eq!(reply.text, "Four");
    assert_eq!(reply.usage.prompt_tokens, 12);
    assert_eq!(reply.usage.completion_tokens, 2);
}

#[tokio::test]
async fn test_anthropic_overload_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "ok"}],
            "usage": {"input_tokens": 5, "output_tokens": 1}
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(anthropic(&server), &dir);
    let request = ModelRequest::new("claude-haiku-4-5", vec![Message::user("hi")]).with_stream(false);

    let reply = client.query(&request).await.unwrap();
    assert_eq!(reply.text, "ok");
    assert_eq!(reply.attempts, 3);
}

#[tokio::test]
async fn test_anthropic_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(anthropic(&server), &dir);
    let request = ModelRequest::new("claude-haiku-4-5", vec![Message::user("hi")]);

    let err = client.query(&request).await.unwrap_err();
    assert!(matches!(&err, Error::Auth { message } if message.contains("invalid x-api-key")));
    assert_eq!(err.failure_kind(), FailureKind::TransportPermanent);
    assert_eq!(client.stats().calls, 0);
}

// =============================================================================
// OpenAI-compatible
// =============================================================================

#[tokio::test]
async fn test_openai_stream_with_usage_chunk() {
    let server = MockServer::start().await;
    let body = [
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "lo"}}]}),
        json!({"choices": [], "usage": {"prompt_tokens": 1000000, "completion_tokens": 100000}}),
    ]
    .iter()
    .map(|chunk| format!("data: {chunk}\n\n"))
    .chain(std::iter::once("data: [DONE]\n\n".to_string()))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(openai(&server), &dir);
    let request = ModelRequest::new("gpt-4o-mini", vec![Message::user("greet")])
        .with_stream(true)
        .with_include_usage(true);

    let reply = client.query(&request).await.unwrap();

    assert_eq!(reply.text, "Hello");
    assert_eq!(reply.usage.prompt_tokens, 1_000_000);
    // 1M * $0.15/M + 100k * $0.60/M
    assert_eq!(reply.charged_cost, dec!(0.21));
    assert_eq!(reply.context_window, Some(128_000));
}

#[tokio::test]
async fn test_openai_stream_without_usage_is_estimated() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"abcdefgh\"}}]}\n\ndata: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(openai(&server), &dir);
    let request = ModelRequest::new("gpt-4o", vec![Message::user("abcd")])
        .with_stream(true)
        .with_include_usage(false);

    let reply = client.query(&request).await.unwrap();
    assert!(reply.usage.estimated);
    assert_eq!(reply.usage.prompt_tokens, 1);
    assert_eq!(reply.usage.completion_tokens, 2);
}

#[tokio::test]
async fn test_openai_rate_limit_honors_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "done"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(openai(&server), &dir);
    let request = ModelRequest::new("gpt-4o", vec![Message::user("hi")]).with_stream(false);

    let reply = client.query(&request).await.unwrap();
    assert_eq!(reply.text, "done");
    assert_eq!(reply.attempts, 2);
}

#[tokio::test]
async fn test_openai_bad_request_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "unknown model"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(openai(&server), &dir);
    let request = ModelRequest::new("gpt-404", vec![Message::user("hi")]).with_stream(false);

    let err = client.query(&request).await.unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(err.failure_kind(), FailureKind::TransportPermanent);
}
