use dialect_gateway::config::GatewayConfig;
use dialect_gateway::logging::{SharedLogger, UsageReport, UsageSink};
use dialect_gateway::tokens::image_tokens;
use dialect_gateway::translate::bridge;
use dialect_gateway::translate::chat_types::*;
use dialect_gateway::translate::responses_types::ResponsesStreamEvent;
use dialect_gateway::translate::streaming::ResponsesStreamReconstructor;
use dialect_gateway::translate::unified::{ImageDetail, Message, Role, UnifiedRequest};
use dialect_gateway::translate::{chat, responses, Dialect};
use dialect_gateway::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Collector(Mutex<Vec<UsageReport>>);

impl Collector {
    fn reports(&self) -> Vec<UsageReport> {
        self.0.lock().unwrap().clone()
    }
}

impl UsageSink for Collector {
    fn record_usage(&self, report: &UsageReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

fn channel_config(channel: &str, base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::for_channel(channel);
    config.port = 0;
    config.channel.base_url = Some(base_url.to_string());
    config.channel.api_key = Some("test-key".to_string());
    config.approximate_tokens = true;
    config
}

/// Serve the router on an ephemeral port; returns its base URL and the usage collector.
async fn spawn_gateway(config: GatewayConfig) -> (String, Arc<Collector>) {
    let log_path = std::env::temp_dir().join(format!(
        "dialect-gateway-test-{}.log",
        uuid::Uuid::new_v4().simple()
    ));
    let logger = SharedLogger::new(&log_path).unwrap();
    let collector = Arc::new(Collector::default());
    let state = AppState::new(config, reqwest::Client::new(), logger)
        .with_usage_sink(collector.clone());

    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), collector)
}

fn sse_body(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn chat_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "upstream-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
    })
}

fn chat_chunk(delta: Value, finish: Option<&str>) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "created": 1700000000,
        "model": "upstream-model",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
    })
}

fn usage_chunk() -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "created": 1700000000,
        "model": "upstream-model",
        "choices": [],
        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
    })
}

// ────────────────────────────────────────────────────────────────
// Cross-module properties
// ────────────────────────────────────────────────────────────────

#[test]
fn test_tool_choice_normalization_is_idempotent() {
    let inputs = [
        json!("auto"),
        json!("any"),
        json!({"type": "tool", "name": "get_weather"}),
        json!({"type": "function", "function": {"name": "get_weather"}}),
        json!({"name": "get_weather"}),
        json!({"type": "none"}),
    ];
    for target in [Dialect::Chat, Dialect::Responses] {
        for input in &inputs {
            let once = bridge::normalize_tool_choice(
                &bridge::normalize_tool_choice_value(input).unwrap(),
                target,
            );
            let twice = bridge::normalize_tool_choice(
                &bridge::normalize_tool_choice_value(&once).unwrap(),
                target,
            );
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }
}

#[test]
fn test_function_call_survives_chat_responses_chat() {
    let req: ChatCompletionRequest = serde_json::from_value(json!({
        "model": "gpt-4.1",
        "messages": [
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}
            }]},
            {"role": "tool", "tool_call_id": "call_abc", "content": "rainy"}
        ],
        "tools": [{"type": "function", "function": {
            "name": "get_weather",
            "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
        }}]
    }))
    .unwrap();

    let responses_req = responses::unified_to_request(&chat::request_to_unified(&req));
    let back = chat::unified_to_request(&responses::request_to_unified(&responses_req)).unwrap();

    let call = back
        .messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .next()
        .expect("tool call preserved");
    assert_eq!(call.function.name, "get_weather");
    assert_eq!(call.function.arguments, "{\"city\":\"London\"}");
    assert!(call.id.ends_with("abc"));
}

#[test]
fn test_image_token_constants() {
    assert_eq!(image_tokens((1024, 1024), &ImageDetail::High, "gpt-4o").unwrap(), 4 * 170 + 85);
    assert_eq!(image_tokens((4000, 3000), &ImageDetail::Low, "gpt-4o").unwrap(), 85);
    assert_eq!(image_tokens((1, 1), &ImageDetail::Low, "gpt-4.1").unwrap(), 85);
}

#[test]
fn test_snapshot_and_deltas_agree() {
    let completed = |status: &str| {
        json!({"type": "response.completed", "response": {
            "id": "resp_1", "created_at": 1, "model": "gpt-4.1", "status": status,
            "output": [{"type": "message", "id": "msg_1", "role": "assistant",
                        "content": [{"type": "output_text", "text": "Hello world", "annotations": []}]}]
        }})
    };

    let mut full = ResponsesStreamReconstructor::new("gpt-4.1");
    let mut full_chunks = full.process_data(&completed("completed").to_string()).unwrap();
    full_chunks.extend(full.finish().0);

    let mut deltas = ResponsesStreamReconstructor::new("gpt-4.1");
    let mut delta_chunks = Vec::new();
    for event in [
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "Hello"}),
        json!({"type": "response.output_text.done", "item_id": "msg_1", "output_index": 0, "content_index": 0, "text": "Hello world"}),
        completed("completed"),
    ] {
        delta_chunks.extend(deltas.process_data(&event.to_string()).unwrap());
    }
    delta_chunks.extend(deltas.finish().0);

    assert_eq!(full.text(), "Hello world");
    assert_eq!(full.text(), deltas.text());
    let finish = |chunks: &[ChatCompletionChunk]| {
        chunks
            .iter()
            .flat_map(|c| c.choices.iter())
            .find_map(|c| c.finish_reason.clone())
    };
    assert_eq!(finish(&full_chunks), Some("stop".to_string()));
    assert_eq!(finish(&full_chunks), finish(&delta_chunks));
}

#[test]
fn test_repeated_search_call_is_metered_once() {
    let mut rec = ResponsesStreamReconstructor::new("gpt-4o-search-preview");
    let event: ResponsesStreamEvent = serde_json::from_value(json!({
        "type": "response.web_search_call.completed",
        "item_id": "ws_1",
        "output_index": 0
    }))
    .unwrap();
    rec.process_event(&event).unwrap();
    rec.process_event(&event).unwrap();
    assert_eq!(rec.search_calls(), 1);
}

#[test]
fn test_reasoning_effort_always_allowed() {
    for model in ["o1", "o3", "o3-mini", "o4-mini", "gpt-5", "gpt-5-mini", "o3-deep-research"] {
        for requested in [None, Some(""), Some("ultra"), Some("HIGH")] {
            let mut req = UnifiedRequest {
                model: model.to_string(),
                ..UnifiedRequest::default()
            };
            if let Some(effort) = requested {
                req.reasoning = Some(dialect_gateway::translate::unified::ReasoningConfig {
                    effort: Some(effort.to_string()),
                    summary: None,
                });
            }
            bridge::apply(&mut req, Dialect::Responses);
            let profile = bridge::reasoning_profile(model).unwrap();
            let effort = req.reasoning.and_then(|r| r.effort).unwrap_or_default();
            assert!(!effort.is_empty(), "{model}: empty effort");
            assert!(profile.allowed.contains(&effort.as_str()), "{model}: {effort} not allowed");
        }
    }
}

#[test]
fn test_system_message_hoisted_into_instructions() {
    let mut req = UnifiedRequest {
        model: "gpt-4.1".to_string(),
        ..UnifiedRequest::default()
    };
    req.messages.push(Message::text(Role::System, "Be terse."));
    req.messages.push(Message::text(Role::User, "hi"));
    req.messages.push(Message::text(Role::Assistant, "hello"));

    let out = responses::unified_to_request(&req);
    assert_eq!(out.instructions.as_deref(), Some("Be terse."));
    match out.input {
        dialect_gateway::translate::responses_types::ResponsesInput::Items(items) => {
            assert_eq!(items.len(), req.messages.len() - 1);
        }
        other => panic!("unexpected input {other:?}"),
    }
}

// ────────────────────────────────────────────────────────────────
// End-to-end through the router (wiremock upstream)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_models() {
    let upstream = MockServer::start().await;
    let mut config = channel_config("openai", &upstream.uri());
    config.models.insert("fast".to_string(), "gpt-4.1-mini".to_string());
    let (base, _) = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    let health: Value = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let models: Value = client.get(format!("{base}/v1/models")).send().await.unwrap().json().await.unwrap();
    assert_eq!(models["data"][0]["id"], "fast");
    assert_eq!(models["data"][0]["owned_by"], "openai");
}

#[tokio::test]
async fn test_chat_caller_on_chat_channel() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("pong")))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = channel_config("groq", &upstream.uri());
    config.models.insert("fast".to_string(), "llama-3.3-70b".to_string());
    let (base, usage) = spawn_gateway(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "fast", "messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["model"], "fast");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["usage"]["total_tokens"], 12);

    let sent: Value = serde_json::from_slice(&upstream.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(sent["model"], "llama-3.3-70b");

    let reports = usage.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target_dialect, "chat");
    assert!(!reports[0].usage.estimated);
}

#[tokio::test]
async fn test_messages_caller_streams_from_chat_upstream() {
    let upstream = MockServer::start().await;
    let body = sse_body(&[
        chat_chunk(json!({"role": "assistant", "content": "Hel"}), None),
        chat_chunk(json!({"content": "lo"}), None),
        chat_chunk(json!({}), Some("stop")),
        usage_chunk(),
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("openai", &upstream.uri())).await;
    let text = reqwest::Client::new()
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "gpt-4.1",
            "max_tokens": 64,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let start = text.find("event: message_start").expect("message_start");
    let delta = text.find("event: content_block_delta").expect("content delta");
    let stop = text.find("event: message_stop").expect("message_stop");
    assert!(start < delta && delta < stop);
    assert!(text.contains("\"output_tokens\":2"));

    let sent: Value = serde_json::from_slice(&upstream.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(sent["stream_options"]["include_usage"], true);

    let reports = usage.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].usage.total_tokens, 12);
    assert!(reports[0].error.is_none());
}

#[tokio::test]
async fn test_chat_caller_streams_from_responses_upstream() {
    let upstream = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "response.created", "response": {"id": "resp_1", "created_at": 1, "model": "o3-pro", "output": []}}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "Hi"}),
        json!({"type": "response.completed", "response": {
            "id": "resp_1", "created_at": 1, "model": "o3-pro", "status": "completed", "output": [],
            "usage": {"input_tokens": 7, "output_tokens": 1, "total_tokens": 8}
        }}),
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("openai", &upstream.uri())).await;
    let text = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "o3-pro", "stream": true, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let chunks: Vec<Value> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter(|d| *d != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert!(text.trim_end().ends_with("data: [DONE]"));
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hi");
    assert!(chunks.iter().all(|c| c["model"] == "o3-pro"));
    assert!(chunks.iter().any(|c| c["choices"][0]["finish_reason"] == "stop"));
    assert_eq!(chunks.last().unwrap()["usage"]["total_tokens"], 8);
    assert_eq!(usage.reports()[0].usage.total_tokens, 8);
}

#[tokio::test]
async fn test_responses_caller_downgraded_to_chat() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("Berlin.")))
        .mount(&upstream)
        .await;

    let (base, _) = spawn_gateway(channel_config("deepseek", &upstream.uri())).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{base}/v1/responses"))
        .json(&json!({"model": "deepseek-chat", "instructions": "Be brief.", "input": "Capital of Germany?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "response");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output"][0]["type"], "message");
    assert_eq!(body["output"][0]["content"][0]["text"], "Berlin.");
    assert_eq!(body["usage"]["input_tokens"], 10);

    let sent: Value = serde_json::from_slice(&upstream.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][0]["content"], "Be brief.");
}

#[tokio::test]
async fn test_prompt_template_rejected_before_network() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let (base, _) = spawn_gateway(channel_config("groq", &upstream.uri())).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/responses"))
        .json(&json!({"model": "gpt-4.1", "prompt": {"id": "pmpt_1"}, "input": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_feature");
}

#[tokio::test]
async fn test_anthropic_channel_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "pong"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 9, "output_tokens": 1}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("anthropic", &upstream.uri())).await;
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["content"][0]["text"], "pong");
    assert_eq!(usage.reports()[0].usage.total_tokens, 10);

    // Other dialects cannot be served by a passthrough-only channel.
    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "claude-sonnet-4-20250514", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_bedrock_converse_round_trip() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/.+/converse$"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "Hi there"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 5, "outputTokens": 2, "totalTokens": 7}
        })))
        .mount(&upstream)
        .await;

    let (base, _) = spawn_gateway(channel_config("bedrock", &upstream.uri())).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "claude-sonnet-4-20250514", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 7);

    // Streaming callers get a stream synthesized from the single converse response.
    let text = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "claude-sonnet-4-20250514", "stream": true,
                      "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("Hi there"));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    // Unmapped models fail before any conversion work.
    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn test_upstream_error_rendered_in_caller_dialect() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
        })))
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("groq", &upstream.uri())).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/messages"))
        .json(&json!({"model": "llama-3.3-70b", "max_tokens": 8, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("Rate limit reached"));

    let reports = usage.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
}

#[tokio::test]
async fn test_missing_upstream_usage_is_estimated() {
    let upstream = MockServer::start().await;
    let mut completion = chat_completion("a fairly long answer from the model");
    completion.as_object_mut().unwrap().remove("usage");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion))
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("groq", &upstream.uri())).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "llama-3.3-70b", "messages": [{"role": "user", "content": "tell me something"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
    assert!(body["usage"]["completion_tokens"].as_u64().unwrap() > 0);
    assert!(usage.reports()[0].usage.estimated);
}

#[tokio::test]
async fn test_responses_stream_error_event_is_reported() {
    let upstream = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "response.created", "response": {"id": "resp_1", "created_at": 1, "model": "gpt-4.1", "output": []}}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "part"}),
        json!({"type": "error", "code": "server_error", "message": "boom"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("openai", &upstream.uri())).await;
    let text = reqwest::Client::new()
        .post(format!("{base}/v1/responses"))
        .json(&json!({"model": "gpt-4.1", "stream": true, "input": "hi"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(text.contains("event: error"));
    assert!(text.contains("boom"));
    let reports = usage.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
    assert!(reports[0].usage.completion_tokens > 0);
}

#[tokio::test]
async fn test_failed_and_incomplete_responses_reach_message_callers() {
    let upstream = MockServer::start().await;
    let failed = sse_body(&[
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "so far"}),
        json!({"type": "response.failed", "response": {
            "id": "resp_1", "created_at": 1, "model": "o3-pro", "status": "failed", "output": [],
            "error": {"code": "server_error", "message": "model crashed"},
            "usage": {"input_tokens": 9, "output_tokens": 2, "total_tokens": 11}
        }}),
    ]);
    let incomplete = sse_body(&[
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "cut"}),
        json!({"type": "response.incomplete", "response": {
            "id": "resp_2", "created_at": 1, "model": "o3-pro", "status": "incomplete", "output": [],
            "incomplete_details": {"reason": "max_output_tokens"},
            "usage": {"input_tokens": 9, "output_tokens": 4, "total_tokens": 13}
        }}),
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(failed))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(incomplete))
        .mount(&upstream)
        .await;

    let (base, usage) = spawn_gateway(channel_config("openai", &upstream.uri())).await;
    let request = json!({
        "model": "o3-pro", "max_tokens": 64, "stream": true,
        "messages": [{"role": "user", "content": "hi"}]
    });
    let client = reqwest::Client::new();
    let mut bodies = Vec::new();
    for _ in 0..2 {
        let text = client
            .post(format!("{base}/v1/messages"))
            .json(&request)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        bodies.push(text);
    }

    assert!(bodies[0].contains("\"stop_reason\":\"end_turn\""));
    assert!(bodies[0].contains("event: error"));
    assert!(bodies[1].contains("\"stop_reason\":\"max_tokens\""));
    assert!(!bodies[1].contains("event: error"));

    let reports = usage.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
    assert_eq!(reports[0].usage.total_tokens, 11);
    assert!(reports[1].error_kind.is_none());
    assert_eq!(reports[1].usage.total_tokens, 13);
}
