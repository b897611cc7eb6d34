//! Upstream I/O and the streaming pull loop.
//!
//! `send_json` and `stream_events` talk to the provider; `pipe` reads one
//! upstream event at a time, turns it into the caller's dialect and yields it.
//! Every request's usage ends up in a [`UsageFinalizer`], including requests
//! whose caller disconnected mid-stream.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::dispatch::RequestContext;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::logging::UsageSink;
use crate::media::MediaFetcher;
use crate::tokens::TokenCounter;
use crate::translate::anthropic::chat_error_to_claude;
use crate::translate::anthropic_types::{self, ErrorResponse};
use crate::translate::chat_types::{ChatCompletionChunk, ChatErrorResponse};
use crate::translate::claude_stream::StreamTranslator;
use crate::translate::responses_stream::ResponsesStreamEncoder;
use crate::translate::responses_types::ResponsesStreamEvent;
use crate::translate::streaming::ResponsesStreamReconstructor;
use crate::translate::unified::Message;
use crate::translate::Dialect;
use crate::usage::UsageRecord;

/// One server-sent event on the caller-facing side.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// SSE `data:` payloads from the provider, ending before the `[DONE]` sentinel.
pub type DataStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

// ---------------------------------------------------------------------------
// Upstream I/O
// ---------------------------------------------------------------------------

/// Send a request and return the body of a successful response.
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<Bytes> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::upstream(None, format!("Request failed: {}", e)))?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::upstream(Some(status), format!("Failed to read response body: {}", e)))?;

    tracing::debug!(status, body_len = body.len(), "Upstream response");

    if status >= 400 {
        return Err(upstream_error(status, &body));
    }
    Ok(body)
}

/// Send a streaming request and return its SSE data payloads.
pub async fn stream_events(request: reqwest::RequestBuilder) -> Result<DataStream> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::upstream(None, format!("Streaming request failed: {}", e)))?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.bytes().await.unwrap_or_default();
        return Err(upstream_error(status, &body));
    }

    let events = response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => Some(Ok(event.data)),
                Err(e) => Some(Err(GatewayError::upstream(None, format!("Byte stream error: {}", e)))),
            }
        })
        .take_while(|item| {
            let done = matches!(item, Ok(data) if data.trim() == "[DONE]");
            async move { !done }
        });

    Ok(Box::pin(events))
}

/// Build the error for a non-2xx upstream response, keeping the provider's
/// error type when its body is a recognised error document.
pub fn upstream_error(status: u16, body: &[u8]) -> GatewayError {
    if let Ok(err) = serde_json::from_slice::<ErrorResponse>(body) {
        return GatewayError::upstream_typed(status, err.error.error_type, err.error.message);
    }
    if let Ok(err) = serde_json::from_slice::<ChatErrorResponse>(body) {
        if err.error.error_type.is_empty() {
            return GatewayError::upstream(Some(status), err.error.message);
        }
        return GatewayError::upstream_typed(status, err.error.error_type, err.error.message);
    }
    let text = String::from_utf8_lossy(body);
    GatewayError::upstream(
        Some(status),
        format!("Provider returned status {}: {}", status, truncate(&text, 500)),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Error body in the caller's dialect.
pub fn error_body(dialect: Dialect, err: &GatewayError) -> Value {
    let error_type = err.upstream_error_type().unwrap_or(match err.kind() {
        ErrorKind::UnsupportedFeature
        | ErrorKind::ModelResolutionFailure => "invalid_request_error",
        ErrorKind::UpstreamTransport => "upstream_error",
        _ => "api_error",
    });
    let chat = ChatErrorResponse::new(error_type, err.to_string());
    let body = match dialect {
        Dialect::Messages => serde_json::to_value(chat_error_to_claude(&chat)),
        _ => serde_json::to_value(&chat).map(|mut value| {
            value["error"]["code"] = json!(err.kind().as_str());
            value
        }),
    };
    body.unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Usage finalization
// ---------------------------------------------------------------------------

/// Turns observed usage into the billed record and hands it to the sink.
pub struct UsageFinalizer {
    ctx: RequestContext,
    sink: Arc<dyn UsageSink>,
    counter: TokenCounter,
    media: Option<MediaFetcher>,
    prompt: Vec<Message>,
    quota_per_usd: f64,
}

impl UsageFinalizer {
    pub fn new(
        ctx: RequestContext,
        sink: Arc<dyn UsageSink>,
        counter: TokenCounter,
        media: Option<MediaFetcher>,
        prompt: Vec<Message>,
        quota_per_usd: f64,
    ) -> Self {
        Self {
            ctx,
            sink,
            counter,
            media,
            prompt,
            quota_per_usd,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Estimate whatever the provider did not report, then settle.
    pub async fn finish(
        self,
        mut usage: UsageRecord,
        completion_text: &str,
        search_calls: u64,
        error: Option<&GatewayError>,
    ) -> UsageRecord {
        if usage.prompt_tokens == 0 || usage.completion_tokens == 0 {
            let model = &self.ctx.upstream_model;
            let prompt = if usage.prompt_tokens == 0 {
                self.counter
                    .count_messages(self.media.as_ref(), &self.prompt, model)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "Prompt estimate failed, counting text only");
                        0
                    })
            } else {
                0
            };
            let completion = self.counter.count_text(completion_text, model);
            usage.fill_missing(prompt, completion);
        }
        self.settle(usage, search_calls, error)
    }

    /// Charge metered tools and report, without estimation.
    pub fn settle(self, mut usage: UsageRecord, search_calls: u64, error: Option<&GatewayError>) -> UsageRecord {
        usage.finalize_total();
        if search_calls > 0 {
            usage.charge_web_search(&self.ctx.upstream_model, search_calls, self.quota_per_usd);
        }
        self.sink.record_usage(&self.ctx.report(&usage, error));
        usage
    }
}

/// Usage observed while a stream is running. Dropping it before `complete`
/// reports the best-known usage with a write failure.
pub struct StreamAccounting {
    usage: UsageRecord,
    completion: String,
    search_calls: u64,
    finalizer: Option<UsageFinalizer>,
}

impl StreamAccounting {
    pub fn new(finalizer: UsageFinalizer) -> Self {
        Self {
            usage: UsageRecord::default(),
            completion: String::new(),
            search_calls: 0,
            finalizer: Some(finalizer),
        }
    }

    fn observe_chunk(&mut self, chunk: &ChatCompletionChunk) {
        if let Some(ref usage) = chunk.usage {
            self.usage.merge_report(&usage.to_record());
        }
        for choice in &chunk.choices {
            if let Some(ref text) = choice.delta.content {
                self.completion.push_str(text);
            }
            if let Some(ref text) = choice.delta.reasoning_content {
                self.completion.push_str(text);
            }
            for tc in choice.delta.tool_calls.iter().flatten() {
                if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
                    self.completion.push_str(args);
                }
            }
        }
    }

    fn observe_messages_event(&mut self, data: &str) {
        let Ok(event) = serde_json::from_str::<anthropic_types::StreamEvent>(data) else {
            return;
        };
        match event {
            anthropic_types::StreamEvent::MessageStart { message } => {
                self.usage.merge_report(&UsageRecord::reported(
                    message.usage.input_tokens,
                    message.usage.output_tokens,
                    None,
                ));
            }
            anthropic_types::StreamEvent::MessageDelta { usage, .. } => {
                self.usage.merge_report(&UsageRecord::reported(
                    usage.input_tokens,
                    usage.output_tokens,
                    None,
                ));
            }
            anthropic_types::StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                anthropic_types::Delta::TextDelta { text } => self.completion.push_str(&text),
                anthropic_types::Delta::ThinkingDelta { thinking } => self.completion.push_str(&thinking),
                anthropic_types::Delta::InputJsonDelta { partial_json } => {
                    self.completion.push_str(&partial_json);
                }
            },
            _ => {}
        }
    }

    /// Settle usage for a stream that reached its end (or an upstream error).
    pub async fn complete(&mut self, error: Option<&GatewayError>) -> UsageRecord {
        let Some(finalizer) = self.finalizer.take() else {
            return self.usage.clone();
        };
        let usage = std::mem::take(&mut self.usage);
        finalizer.finish(usage, &self.completion, self.search_calls, error).await
    }
}

impl Drop for StreamAccounting {
    fn drop(&mut self) {
        let Some(finalizer) = self.finalizer.take() else {
            return;
        };
        let usage = std::mem::take(&mut self.usage);
        let completion = std::mem::take(&mut self.completion);
        let calls = self.search_calls;
        let err = GatewayError::write_failure("client disconnected before the stream finished");
        tracing::warn!(request_id = %finalizer.context().request_id, "{}", err);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    finalizer.finish(usage, &completion, calls, Some(&err)).await;
                });
            }
            Err(_) => {
                finalizer.settle(usage, calls, Some(&err));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stream pipeline
// ---------------------------------------------------------------------------

/// Encodes hub chunks into the caller's dialect.
pub enum ClientEncoder {
    Chat { model: String },
    Messages(StreamTranslator),
    Responses(ResponsesStreamEncoder),
}

impl ClientEncoder {
    pub fn for_dialect(dialect: Dialect, model: &str) -> Self {
        match dialect {
            Dialect::Messages => ClientEncoder::Messages(StreamTranslator::new(model)),
            Dialect::Responses => ClientEncoder::Responses(ResponsesStreamEncoder::new(model)),
            Dialect::Chat | Dialect::Converse => ClientEncoder::Chat {
                model: model.to_string(),
            },
        }
    }

    fn dialect(&self) -> Dialect {
        match self {
            ClientEncoder::Chat { .. } => Dialect::Chat,
            ClientEncoder::Messages(_) => Dialect::Messages,
            ClientEncoder::Responses(_) => Dialect::Responses,
        }
    }

    fn encode(&mut self, chunk: &ChatCompletionChunk) -> Vec<SseEvent> {
        match self {
            ClientEncoder::Chat { model } => {
                let mut chunk = chunk.clone();
                chunk.model.clone_from(model);
                serde_json::to_string(&chunk)
                    .map(|json| vec![SseEvent::data(json)])
                    .unwrap_or_default()
            }
            ClientEncoder::Messages(translator) => translator
                .process_chunk(chunk)
                .iter()
                .filter_map(message_event)
                .collect(),
            ClientEncoder::Responses(encoder) => {
                let events = encoder.process_chunk(chunk);
                events.iter().map(|e| responses_event(encoder, e)).collect()
            }
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        match self {
            ClientEncoder::Chat { .. } => vec![SseEvent::data("[DONE]")],
            ClientEncoder::Messages(translator) => {
                translator.finish().iter().filter_map(message_event).collect()
            }
            ClientEncoder::Responses(encoder) => {
                let events = encoder.finish();
                events.iter().map(|e| responses_event(encoder, e)).collect()
            }
        }
    }
}

fn message_event(event: &anthropic_types::StreamEvent) -> Option<SseEvent> {
    serde_json::to_string(event)
        .ok()
        .map(|json| SseEvent::named(event.event_name(), json))
}

fn responses_event(encoder: &mut ResponsesStreamEncoder, event: &ResponsesStreamEvent) -> SseEvent {
    SseEvent::named(event.event_name(), encoder.encode(event).to_string())
}

fn error_event(dialect: Dialect, err: &GatewayError) -> SseEvent {
    let body = error_body(dialect, err);
    match dialect {
        Dialect::Chat | Dialect::Converse => SseEvent::data(body.to_string()),
        Dialect::Messages => SseEvent::named("error", body.to_string()),
        Dialect::Responses => {
            let event = json!({
                "type": "error",
                "code": body["error"]["type"],
                "message": body["error"]["message"],
            });
            SseEvent::named("error", event.to_string())
        }
    }
}

/// Where a stream's events come from and how they reach the caller.
pub enum StreamSource {
    /// Upstream chat chunks.
    Chat(DataStream),
    /// Upstream structured-response events, reconstructed into chunks.
    Responses(DataStream, ResponsesStreamReconstructor),
    /// Structured-response events forwarded verbatim to a caller of the same dialect.
    ResponsesPassthrough(DataStream, ResponsesStreamReconstructor),
    /// Message-style events forwarded verbatim.
    MessagesPassthrough(DataStream),
    /// Chunks replayed from a complete response.
    Synthesized(Vec<ChatCompletionChunk>),
}

/// Run the pull loop: read one upstream event, convert it, yield it.
pub fn pipe(source: StreamSource, encoder: ClientEncoder, accounting: StreamAccounting) -> SseStream {
    Box::pin(async_stream::stream! {
        let mut acc = accounting;
        let mut encoder = encoder;
        let dialect = encoder.dialect();
        let mut failure: Option<GatewayError> = None;

        match source {
            StreamSource::Chat(mut events) => {
                while let Some(item) = events.next().await {
                    let data = match item {
                        Ok(data) => data,
                        Err(e) => { failure = Some(e); break; }
                    };
                    let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::debug!(error = %GatewayError::stream_parse(e.to_string()), "Skipping stream event");
                            continue;
                        }
                    };
                    acc.observe_chunk(&chunk);
                    for event in encoder.encode(&chunk) {
                        yield event;
                    }
                }
            }
            StreamSource::Responses(mut events, mut reconstructor) => {
                while let Some(item) = events.next().await {
                    let chunks = match item.and_then(|data| reconstructor.process_data(&data)) {
                        Ok(chunks) => chunks,
                        Err(e) => { failure = Some(e); break; }
                    };
                    for chunk in &chunks {
                        acc.observe_chunk(chunk);
                        for event in encoder.encode(chunk) {
                            yield event;
                        }
                    }
                }
                let (tail, _) = reconstructor.finish();
                for chunk in &tail {
                    acc.observe_chunk(chunk);
                    for event in encoder.encode(chunk) {
                        yield event;
                    }
                }
                acc.search_calls = reconstructor.search_calls();
                if failure.is_none() {
                    failure = reconstructor.take_failure();
                }
            }
            StreamSource::ResponsesPassthrough(mut events, mut reconstructor) => {
                // Provider error events reach the caller verbatim; only transport
                // failures need a synthesized error event.
                let mut transport_failed = false;
                while let Some(item) = events.next().await {
                    let data = match item {
                        Ok(data) => data,
                        Err(e) => {
                            failure = Some(e);
                            transport_failed = true;
                            break;
                        }
                    };
                    match reconstructor.process_data(&data) {
                        Ok(chunks) => chunks.iter().for_each(|c| acc.observe_chunk(c)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Provider reported a stream error");
                            failure.get_or_insert(e);
                        }
                    }
                    let name = serde_json::from_str::<Value>(&data)
                        .ok()
                        .and_then(|v| v["type"].as_str().map(String::from));
                    yield SseEvent { event: name, data };
                }
                let (tail, _) = reconstructor.finish();
                tail.iter().for_each(|c| acc.observe_chunk(c));
                acc.search_calls = reconstructor.search_calls();
                if failure.is_none() {
                    failure = reconstructor.take_failure();
                }
                let error_tail = match failure {
                    Some(ref err) if transport_failed => Some(error_event(dialect, err)),
                    _ => None,
                };
                acc.complete(failure.as_ref()).await;
                if let Some(event) = error_tail {
                    yield event;
                }
                return;
            }
            StreamSource::MessagesPassthrough(mut events) => {
                while let Some(item) = events.next().await {
                    let data = match item {
                        Ok(data) => data,
                        Err(e) => { failure = Some(e); break; }
                    };
                    acc.observe_messages_event(&data);
                    let name = serde_json::from_str::<Value>(&data)
                        .ok()
                        .and_then(|v| v["type"].as_str().map(String::from));
                    yield SseEvent { event: name, data };
                }
                acc.complete(failure.as_ref()).await;
                return;
            }
            StreamSource::Synthesized(chunks) => {
                for chunk in &chunks {
                    acc.observe_chunk(chunk);
                    for event in encoder.encode(chunk) {
                        yield event;
                    }
                }
            }
        }

        let mut tail = Vec::new();
        if let Some(ref err) = failure {
            tracing::warn!(error = %err, "Upstream stream ended with an error");
            tail.push(error_event(dialect, err));
        }
        tail.extend(encoder.finish());
        acc.complete(failure.as_ref()).await;
        for event in tail {
            yield event;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::UsageReport;
    use crate::translate::chat_types::{ChatUsage, ChunkChoice, ChunkDelta};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collector(Mutex<Vec<UsageReport>>);

    impl UsageSink for Collector {
        fn record_usage(&self, report: &UsageReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    fn finalizer(sink: Arc<Collector>) -> UsageFinalizer {
        let ctx = RequestContext::new(Dialect::Chat, Dialect::Chat, "gpt-4o", "gpt-4o", true);
        UsageFinalizer::new(
            ctx,
            sink,
            TokenCounter::new(true),
            None,
            vec![Message::text(crate::translate::unified::Role::User, "a".repeat(100))],
            500_000.0,
        )
    }

    fn text_chunk(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "upstream-name".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(text.to_string()),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn test_upstream_error_keeps_provider_type() {
        let body = br#"{"error":{"message":"Rate limit","type":"rate_limit_error"}}"#;
        let err = upstream_error(429, body);
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.upstream_error_type(), Some("rate_limit_error"));

        let err = upstream_error(502, b"<html>bad gateway</html>");
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn test_error_body_per_dialect() {
        let err = GatewayError::unsupported("prompt templates", "chat");
        let chat = error_body(Dialect::Chat, &err);
        assert_eq!(chat["error"]["type"], "invalid_request_error");
        assert_eq!(chat["error"]["code"], "unsupported_feature");

        let messages = error_body(Dialect::Messages, &err);
        assert_eq!(messages["type"], "error");
        assert_eq!(messages["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 100), "short");
    }

    #[tokio::test]
    async fn test_synthesized_chat_stream_ends_with_done() {
        let sink = Arc::new(Collector::default());
        let mut last = text_chunk("");
        last.choices.clear();
        last.usage = Some(ChatUsage::from_record(&UsageRecord::new(7, 3)));

        let stream = pipe(
            StreamSource::Synthesized(vec![text_chunk("hi"), last]),
            ClientEncoder::for_dialect(Dialect::Chat, "gpt-4o"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let events: Vec<SseEvent> = stream.collect().await;

        assert_eq!(events.last().unwrap().data, "[DONE]");
        assert!(events[0].data.contains("\"model\":\"gpt-4o\""));
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].usage.total_tokens, 10);
        assert!(reports[0].error.is_none());
    }

    #[tokio::test]
    async fn test_missing_usage_is_estimated() {
        let sink = Arc::new(Collector::default());
        let stream = pipe(
            StreamSource::Synthesized(vec![text_chunk(&"b".repeat(50))]),
            ClientEncoder::for_dialect(Dialect::Chat, "gpt-4o"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let _: Vec<SseEvent> = stream.collect().await;

        let reports = sink.0.lock().unwrap();
        let usage = &reports[0].usage;
        assert!(usage.estimated);
        // 50 bytes * 0.38
        assert_eq!(usage.completion_tokens, 19);
        assert!(usage.prompt_tokens > 0);
    }

    #[tokio::test]
    async fn test_upstream_error_mid_stream_still_reports_usage() {
        let sink = Arc::new(Collector::default());
        let events: DataStream = Box::pin(futures::stream::iter(vec![
            Ok(serde_json::to_string(&text_chunk("partial")).unwrap()),
            Err(GatewayError::upstream(None, "connection reset")),
        ]));
        let stream = pipe(
            StreamSource::Chat(events),
            ClientEncoder::for_dialect(Dialect::Messages, "claude-sonnet-4"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let events: Vec<SseEvent> = stream.collect().await;

        assert!(events.iter().any(|e| e.event.as_deref() == Some("error")));
        assert_eq!(events.last().unwrap().event.as_deref(), Some("message_stop"));
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
        assert!(reports[0].usage.completion_tokens > 0);
    }

    fn data_stream(events: Vec<Value>) -> DataStream {
        Box::pin(futures::stream::iter(
            events.into_iter().map(|e| Ok(e.to_string())).collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_passthrough_error_event_is_forwarded_and_reported() {
        let sink = Arc::new(Collector::default());
        let events = data_stream(vec![
            json!({"type": "response.created", "response": {"id": "resp_1", "output": []}}),
            json!({"type": "response.output_text.delta", "output_index": 0, "content_index": 0, "delta": "part"}),
            json!({"type": "error", "code": "server_error", "message": "boom"}),
        ]);
        let stream = pipe(
            StreamSource::ResponsesPassthrough(events, ResponsesStreamReconstructor::new("gpt-4.1")),
            ClientEncoder::for_dialect(Dialect::Responses, "gpt-4.1"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let events: Vec<SseEvent> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event.as_deref(), Some("error"));
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
        assert!(reports[0].error.as_deref().unwrap_or("").contains("boom"));
        assert!(reports[0].usage.completion_tokens > 0);
    }

    #[tokio::test]
    async fn test_failed_response_reaches_chat_caller_as_error() {
        let sink = Arc::new(Collector::default());
        let events = data_stream(vec![
            json!({"type": "response.output_text.delta", "output_index": 0, "content_index": 0, "delta": "so far"}),
            json!({"type": "response.failed", "response": {
                "id": "resp_1", "status": "failed", "output": [],
                "error": {"code": "server_error", "message": "model crashed"},
                "usage": {"input_tokens": 9, "output_tokens": 2, "total_tokens": 11}}}),
        ]);
        let stream = pipe(
            StreamSource::Responses(events, ResponsesStreamReconstructor::new("o3-pro")),
            ClientEncoder::for_dialect(Dialect::Chat, "o3-pro"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let events: Vec<SseEvent> = stream.collect().await;

        assert!(events.iter().any(|e| e.data.contains("\"finish_reason\":\"stop\"")));
        assert!(events.iter().any(|e| e.data.contains("model crashed")));
        assert_eq!(events.last().unwrap().data, "[DONE]");
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports[0].error_kind.as_deref(), Some("upstream_error"));
        assert_eq!(reports[0].usage.total_tokens, 11);
    }

    #[tokio::test]
    async fn test_dropped_stream_reports_write_failure() {
        let sink = Arc::new(Collector::default());
        let mut stream = pipe(
            StreamSource::Synthesized(vec![text_chunk("one"), text_chunk("two")]),
            ClientEncoder::for_dialect(Dialect::Chat, "gpt-4o"),
            StreamAccounting::new(finalizer(sink.clone())),
        );
        let first = stream.next().await;
        assert!(first.is_some());
        drop(stream);

        // The drop guard settles on a spawned task.
        for _ in 0..50 {
            if !sink.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_kind.as_deref(), Some("write_failure"));
    }
}
