//! Request normalizer and dispatcher.
//!
//! Picks the provider dialect for a request, runs the tool/reasoning bridge,
//! converts through the unified model, calls the channel and converts the
//! answer back into the caller's dialect. All per-request state lives in a
//! [`RequestContext`] threaded through the call chain.

use std::time::Instant;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::channels::{converse_model_id, ChannelType};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::UsageReport;
use crate::relay::{
    self, pipe, ClientEncoder, SseStream, StreamAccounting, StreamSource, UsageFinalizer,
};
use crate::server::AppState;
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::chat_types::{ChatCompletionRequest, ChatCompletionResponse, ChatUsage};
use crate::translate::converse_types::ConverseResponse;
use crate::translate::responses_types::{ResponsesRequest, ResponsesResponse};
use crate::translate::streaming::{chunks_from_response, ResponsesStreamReconstructor};
use crate::translate::unified::{Message, Role, UnifiedRequest};
use crate::translate::{anthropic, bridge, chat, converse, new_id, responses, Dialect};
use crate::usage::{SearchMeter, UsageRecord};

/// Model families only served by the structured-response endpoint.
const RESPONSES_ONLY_PATTERNS: &[&str] = &[
    "o1-pro",
    "o3-pro",
    "codex",
    "computer-use",
    "deep-research",
];

/// Model families that only speak chat completions.
const LEGACY_PATTERNS: &[&str] = &["gpt-3.5", "deepseek", "llama", "qwen", "mistral", "glm"];

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A parsed caller request, tagged by the dialect it arrived in.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Chat(ChatCompletionRequest),
    Responses(ResponsesRequest),
    Messages(MessagesRequest),
}

impl InboundRequest {
    /// Parse a request body sent to the endpoint of `dialect`.
    pub fn parse(dialect: Dialect, body: &[u8]) -> Result<Self> {
        let stage = "request parse";
        let invalid = |e: serde_json::Error| GatewayError::conversion(stage, e.to_string());
        match dialect {
            Dialect::Chat => serde_json::from_slice(body).map(Self::Chat).map_err(invalid),
            Dialect::Responses => serde_json::from_slice(body).map(Self::Responses).map_err(invalid),
            Dialect::Messages => serde_json::from_slice(body).map(Self::Messages).map_err(invalid),
            Dialect::Converse => Err(GatewayError::unsupported("converse callers", "gateway")),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Chat(_) => Dialect::Chat,
            Self::Responses(_) => Dialect::Responses,
            Self::Messages(_) => Dialect::Messages,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Chat(r) => &r.model,
            Self::Responses(r) => &r.model,
            Self::Messages(r) => &r.model,
        }
    }

    pub fn stream(&self) -> bool {
        match self {
            Self::Chat(r) => r.stream.unwrap_or(false),
            Self::Responses(r) => r.stream.unwrap_or(false),
            Self::Messages(r) => r.stream.unwrap_or(false),
        }
    }

    fn to_unified(&self) -> UnifiedRequest {
        match self {
            Self::Chat(r) => chat::request_to_unified(r),
            Self::Responses(r) => responses::request_to_unified(r),
            Self::Messages(r) => anthropic::request_to_unified(r),
        }
    }
}

/// What the server writes back: one JSON document or an SSE stream.
pub enum GatewayResponse {
    Json(Value),
    Stream(SseStream),
}

/// Everything one request carries from dispatch to usage reporting.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_dialect: Dialect,
    pub target: Dialect,
    pub client_model: String,
    pub upstream_model: String,
    pub stream: bool,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(
        client_dialect: Dialect,
        target: Dialect,
        client_model: &str,
        upstream_model: &str,
        stream: bool,
    ) -> Self {
        Self {
            request_id: new_id("req_"),
            client_dialect,
            target,
            client_model: client_model.to_string(),
            upstream_model: upstream_model.to_string(),
            stream,
            started: Instant::now(),
        }
    }

    pub fn report(&self, usage: &UsageRecord, error: Option<&GatewayError>) -> UsageReport {
        UsageReport {
            request_id: self.request_id.clone(),
            client_dialect: self.client_dialect.to_string(),
            target_dialect: self.target.to_string(),
            model: self.client_model.clone(),
            upstream_model: self.upstream_model.clone(),
            stream: self.stream,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            usage: usage.clone(),
            error_kind: error.map(|e| e.kind().as_str().to_string()),
            error: error.map(ToString::to_string),
        }
    }
}

/// How to address and authenticate against one kind of channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAdaptor {
    OpenAi,
    Azure,
    Anthropic,
    Bedrock,
}

impl ChannelAdaptor {
    pub fn select(channel: ChannelType) -> Self {
        match channel {
            ChannelType::OpenAi | ChannelType::Custom => Self::OpenAi,
            ChannelType::Azure => Self::Azure,
            ChannelType::Anthropic => Self::Anthropic,
            ChannelType::Bedrock => Self::Bedrock,
        }
    }

    /// Endpoint URL for `target` on a channel rooted at `base`.
    pub fn endpoint(&self, base: &str, target: Dialect, model: &str) -> String {
        let base = base.trim_end_matches('/');
        match target {
            Dialect::Chat => format!("{}/chat/completions", base),
            Dialect::Responses => format!("{}/responses", base),
            Dialect::Messages => format!("{}/v1/messages", base),
            Dialect::Converse => format!("{}/model/{}/converse", base, model.replace(':', "%3A")),
        }
    }

    /// Attach credentials and the channel's required headers.
    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
        inbound: &HeaderMap,
    ) -> reqwest::RequestBuilder {
        match self {
            Self::OpenAi | Self::Bedrock => request.bearer_auth(api_key),
            Self::Azure => request.header("api-key", api_key),
            Self::Anthropic => {
                let version = inbound
                    .get("anthropic-version")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(ANTHROPIC_VERSION);
                let mut request = request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", version);
                if let Some(beta) = inbound.get("anthropic-beta").and_then(|v| v.to_str().ok()) {
                    request = request.header("anthropic-beta", beta);
                }
                request
            }
        }
    }
}

/// Decide which provider dialect serves a caller of `client` asking for `model`.
pub fn resolve_target(config: &GatewayConfig, client: Dialect, model: &str) -> Result<Dialect> {
    match config.channel_type() {
        ChannelType::Bedrock => return Ok(Dialect::Converse),
        ChannelType::Anthropic => {
            return if client == Dialect::Messages {
                Ok(Dialect::Messages)
            } else {
                Err(GatewayError::unsupported(
                    format!("{} requests", client),
                    "anthropic channel (messages passthrough only)",
                ))
            };
        }
        _ => {}
    }

    if let Some(format) = config.channel.format {
        if format == Dialect::Messages && client != Dialect::Messages {
            return Err(GatewayError::unsupported(format!("{} requests", client), format.as_str()));
        }
        return Ok(format);
    }
    if config.channel.chat_fallback {
        return Ok(Dialect::Chat);
    }

    let name = model.to_lowercase();
    if RESPONSES_ONLY_PATTERNS.iter().any(|p| name.contains(p)) {
        return Ok(Dialect::Responses);
    }
    if LEGACY_PATTERNS.iter().any(|p| name.contains(p)) || !config.supports_responses() {
        return Ok(Dialect::Chat);
    }

    Ok(match client {
        Dialect::Responses => Dialect::Responses,
        _ => Dialect::Chat,
    })
}

/// Map the caller's model name onto the provider's identifier for `target`.
pub fn resolve_model(config: &GatewayConfig, target: Dialect, model: &str) -> Result<String> {
    let mapped = config.upstream_model(model);
    if target != Dialect::Converse {
        return Ok(mapped);
    }
    converse_model_id(&mapped).ok_or_else(|| GatewayError::model_resolution(model, config.channel.name.clone()))
}

/// Route one caller request through the configured channel.
pub async fn dispatch(
    state: &AppState,
    inbound: InboundRequest,
    headers: &HeaderMap,
) -> Result<GatewayResponse> {
    let client_dialect = inbound.dialect();
    let client_model = inbound.model().to_string();
    let target = resolve_target(&state.config, client_dialect, &client_model)?;
    let upstream_model = resolve_model(&state.config, target, &client_model)?;
    let ctx = RequestContext::new(
        client_dialect,
        target,
        &client_model,
        &upstream_model,
        inbound.stream(),
    );

    tracing::info!(
        request_id = %ctx.request_id,
        client = %client_dialect,
        target = %target,
        model = %client_model,
        upstream_model = %upstream_model,
        stream = ctx.stream,
        "Dispatching request"
    );
    state.logger.info(
        "dispatch",
        format!(
            "{} {}->{} model={} upstream_model={} stream={}",
            ctx.request_id, client_dialect, target, client_model, upstream_model, ctx.stream
        ),
    );

    let adaptor = ChannelAdaptor::select(state.config.channel_type());
    let base = state.config.effective_base_url()?;
    let api_key = state.config.resolve_api_key()?;

    let mut inbound = inbound;
    if let InboundRequest::Messages(ref mut req) = inbound {
        if target == Dialect::Messages {
            return passthrough_messages(state, ctx, adaptor, &base, &api_key, req.clone(), headers).await;
        }
        state.media.inline_message_images(req).await?;
    }

    let mut unified = inbound.to_unified();
    unified.model = upstream_model.clone();
    bridge::apply(&mut unified, target);
    if target == Dialect::Converse {
        state.media.inline_images(&mut unified).await?;
    }

    let body = match target {
        Dialect::Chat => serde_json::to_value(chat::unified_to_request(&unified)?)?,
        Dialect::Responses => {
            let mut req = responses::unified_to_request(&unified);
            if let InboundRequest::Responses(ref original) = inbound {
                carry_over(&mut req, original);
            }
            serde_json::to_value(req)?
        }
        Dialect::Converse => serde_json::to_value(converse::unified_to_request(&unified)?)?,
        Dialect::Messages => {
            return Err(GatewayError::unsupported(
                format!("{} requests", client_dialect),
                Dialect::Messages.as_str(),
            ))
        }
    };

    let url = adaptor.endpoint(&base, target, &upstream_model);
    let request = adaptor.authorize(state.client.post(&url).json(&body), &api_key, headers);
    let finalizer = state.finalizer(ctx.clone(), prompt_messages(&unified));

    match target {
        Dialect::Converse => relay_converse(ctx, request, finalizer).await,
        Dialect::Responses => relay_responses(ctx, request, finalizer).await,
        _ => relay_chat(ctx, request, finalizer).await,
    }
}

/// Structured-response fields with no unified counterpart survive a same-dialect hop.
fn carry_over(req: &mut ResponsesRequest, original: &ResponsesRequest) {
    req.previous_response_id.clone_from(&original.previous_response_id);
    req.store = original.store;
    if original.prompt.is_some() {
        req.prompt.clone_from(&original.prompt);
    }
    if original.background.is_some() {
        req.background = original.background;
    }
    for (key, value) in &original.extra {
        req.extra.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

/// The prompt as the token counter sees it, instructions included.
fn prompt_messages(req: &UnifiedRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(ref instructions) = req.instructions {
        messages.push(Message::text(Role::System, instructions.clone()));
    }
    messages.extend(req.messages.iter().cloned());
    messages
}

/// Settle a failed request with empty usage, then hand the error back.
fn fail(finalizer: UsageFinalizer, err: GatewayError) -> GatewayError {
    finalizer.settle(UsageRecord::default(), 0, Some(&err));
    err
}

async fn relay_chat(
    ctx: RequestContext,
    request: reqwest::RequestBuilder,
    finalizer: UsageFinalizer,
) -> Result<GatewayResponse> {
    if ctx.stream {
        let events = match relay::stream_events(request).await {
            Ok(events) => events,
            Err(e) => return Err(fail(finalizer, e)),
        };
        let encoder = ClientEncoder::for_dialect(ctx.client_dialect, &ctx.client_model);
        return Ok(GatewayResponse::Stream(pipe(
            StreamSource::Chat(events),
            encoder,
            StreamAccounting::new(finalizer),
        )));
    }

    let body = match relay::send_json(request).await {
        Ok(body) => body,
        Err(e) => return Err(fail(finalizer, e)),
    };
    let resp: ChatCompletionResponse = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => return Err(fail(finalizer, GatewayError::conversion("response parse", e.to_string()))),
    };
    render_chat(&ctx, resp, finalizer, 0).await
}

async fn relay_converse(
    ctx: RequestContext,
    request: reqwest::RequestBuilder,
    finalizer: UsageFinalizer,
) -> Result<GatewayResponse> {
    let body = match relay::send_json(request).await {
        Ok(body) => body,
        Err(e) => return Err(fail(finalizer, e)),
    };
    let resp: ConverseResponse = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => return Err(fail(finalizer, GatewayError::conversion("response parse", e.to_string()))),
    };
    let chat = converse::response_to_chat(&resp, &ctx.client_model);

    if ctx.stream {
        let encoder = ClientEncoder::for_dialect(ctx.client_dialect, &ctx.client_model);
        return Ok(GatewayResponse::Stream(pipe(
            StreamSource::Synthesized(chunks_from_response(&chat)),
            encoder,
            StreamAccounting::new(finalizer),
        )));
    }
    render_chat(&ctx, chat, finalizer, 0).await
}

async fn relay_responses(
    ctx: RequestContext,
    request: reqwest::RequestBuilder,
    finalizer: UsageFinalizer,
) -> Result<GatewayResponse> {
    if ctx.stream {
        let events = match relay::stream_events(request).await {
            Ok(events) => events,
            Err(e) => return Err(fail(finalizer, e)),
        };
        let reconstructor = ResponsesStreamReconstructor::new(&ctx.client_model);
        let source = if ctx.client_dialect == Dialect::Responses {
            StreamSource::ResponsesPassthrough(events, reconstructor)
        } else {
            StreamSource::Responses(events, reconstructor)
        };
        let encoder = ClientEncoder::for_dialect(ctx.client_dialect, &ctx.client_model);
        return Ok(GatewayResponse::Stream(pipe(source, encoder, StreamAccounting::new(finalizer))));
    }

    let body = match relay::send_json(request).await {
        Ok(body) => body,
        Err(e) => return Err(fail(finalizer, e)),
    };
    let resp: ResponsesResponse = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => return Err(fail(finalizer, GatewayError::conversion("response parse", e.to_string()))),
    };

    let mut meter = SearchMeter::new();
    for item in &resp.output {
        responses::record_web_search(item, &mut meter);
    }

    match ctx.client_dialect {
        Dialect::Responses => {
            let summary = responses::summarize_output(&resp.output);
            let usage = resp.usage.as_ref().map(|u| u.to_record()).unwrap_or_default();
            finalizer
                .finish(usage, &summary.completion_text(), meter.calls(), None)
                .await;
            let mut value: Value = serde_json::from_slice(&body)?;
            value["model"] = Value::String(ctx.client_model.clone());
            Ok(GatewayResponse::Json(value))
        }
        Dialect::Messages => {
            let summary = responses::summarize_output(&resp.output);
            let usage = resp.usage.as_ref().map(|u| u.to_record()).unwrap_or_default();
            let usage = finalizer
                .finish(usage, &summary.completion_text(), meter.calls(), None)
                .await;
            let mut message = responses::response_to_claude(&resp, &ctx.client_model);
            message.usage.input_tokens = usage.prompt_tokens;
            message.usage.output_tokens = usage.completion_tokens;
            Ok(GatewayResponse::Json(serde_json::to_value(message)?))
        }
        _ => render_chat(&ctx, responses::response_to_chat(&resp), finalizer, meter.calls()).await,
    }
}

/// Finalize usage for a hub response and encode it for the caller.
async fn render_chat(
    ctx: &RequestContext,
    mut resp: ChatCompletionResponse,
    finalizer: UsageFinalizer,
    search_calls: u64,
) -> Result<GatewayResponse> {
    let usage = resp.usage.as_ref().map(ChatUsage::to_record).unwrap_or_default();
    let usage = finalizer
        .finish(usage, &completion_text(&resp), search_calls, None)
        .await;
    resp.usage = Some(ChatUsage::from_record(&usage));
    resp.model.clone_from(&ctx.client_model);

    let value = match ctx.client_dialect {
        Dialect::Messages => serde_json::to_value(anthropic::chat_response_to_claude(&resp, &ctx.client_model))?,
        Dialect::Responses => serde_json::to_value(responses::chat_to_response(&resp, &ctx.client_model))?,
        Dialect::Chat | Dialect::Converse => serde_json::to_value(&resp)?,
    };
    Ok(GatewayResponse::Json(value))
}

/// Output text, reasoning and tool arguments of the first choice.
fn completion_text(resp: &ChatCompletionResponse) -> String {
    let mut text = String::new();
    if let Some(choice) = resp.choices.first() {
        if let Some(ref reasoning) = choice.message.reasoning_content {
            text.push_str(reasoning);
        }
        if let Some(ref content) = choice.message.content {
            text.push_str(content);
        }
        for call in choice.message.tool_calls.iter().flatten() {
            text.push_str(&call.function.name);
            text.push_str(&call.function.arguments);
        }
    }
    text
}

/// Forward a message-style request to a message-style channel untouched,
/// observing usage on the way back.
async fn passthrough_messages(
    state: &AppState,
    ctx: RequestContext,
    adaptor: ChannelAdaptor,
    base: &str,
    api_key: &str,
    mut req: MessagesRequest,
    headers: &HeaderMap,
) -> Result<GatewayResponse> {
    let unified = anthropic::request_to_unified(&req);
    let finalizer = state.finalizer(ctx.clone(), prompt_messages(&unified));
    req.model.clone_from(&ctx.upstream_model);

    let url = adaptor.endpoint(base, Dialect::Messages, &ctx.upstream_model);
    let request = adaptor.authorize(state.client.post(&url).json(&req), api_key, headers);

    if ctx.stream {
        let events = match relay::stream_events(request).await {
            Ok(events) => events,
            Err(e) => return Err(fail(finalizer, e)),
        };
        let encoder = ClientEncoder::for_dialect(Dialect::Messages, &ctx.client_model);
        return Ok(GatewayResponse::Stream(pipe(
            StreamSource::MessagesPassthrough(events),
            encoder,
            StreamAccounting::new(finalizer),
        )));
    }

    let body = match relay::send_json(request).await {
        Ok(body) => body,
        Err(e) => return Err(fail(finalizer, e)),
    };
    let mut value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return Err(fail(finalizer, GatewayError::conversion("response parse", e.to_string()))),
    };

    let usage = UsageRecord::reported(
        value["usage"]["input_tokens"].as_u64().unwrap_or(0),
        value["usage"]["output_tokens"].as_u64().unwrap_or(0),
        None,
    );
    let text: String = value["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|block| block["text"].as_str().or_else(|| block["thinking"].as_str()))
        .collect();
    finalizer.finish(usage, &text, 0, None).await;

    value["model"] = Value::String(ctx.client_model.clone());
    Ok(GatewayResponse::Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(channel: &str) -> GatewayConfig {
        GatewayConfig::for_channel(channel)
    }

    #[test]
    fn test_bedrock_always_converse() {
        let cfg = config("bedrock");
        for client in [Dialect::Chat, Dialect::Responses, Dialect::Messages] {
            assert_eq!(resolve_target(&cfg, client, "claude-sonnet-4-20250514").unwrap(), Dialect::Converse);
        }
    }

    #[test]
    fn test_anthropic_channel_is_passthrough_only() {
        let cfg = config("anthropic");
        assert_eq!(resolve_target(&cfg, Dialect::Messages, "claude-sonnet-4").unwrap(), Dialect::Messages);
        let err = resolve_target(&cfg, Dialect::Chat, "claude-sonnet-4").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedFeature);
    }

    #[test]
    fn test_openai_routing_by_model_and_caller() {
        let cfg = config("openai");
        assert_eq!(resolve_target(&cfg, Dialect::Chat, "o3-pro").unwrap(), Dialect::Responses);
        assert_eq!(resolve_target(&cfg, Dialect::Responses, "gpt-3.5-turbo").unwrap(), Dialect::Chat);
        assert_eq!(resolve_target(&cfg, Dialect::Responses, "gpt-4.1").unwrap(), Dialect::Responses);
        assert_eq!(resolve_target(&cfg, Dialect::Chat, "gpt-4.1").unwrap(), Dialect::Chat);
        assert_eq!(resolve_target(&cfg, Dialect::Messages, "gpt-4.1").unwrap(), Dialect::Chat);
    }

    #[test]
    fn test_override_and_fallback() {
        let mut cfg = config("openai");
        cfg.channel.chat_fallback = true;
        assert_eq!(resolve_target(&cfg, Dialect::Responses, "gpt-4.1").unwrap(), Dialect::Chat);

        cfg.channel.format = Some(Dialect::Responses);
        assert_eq!(resolve_target(&cfg, Dialect::Chat, "deepseek-chat").unwrap(), Dialect::Responses);
    }

    #[test]
    fn test_chat_only_channel_downgrades_responses_callers() {
        let cfg = config("groq");
        assert_eq!(resolve_target(&cfg, Dialect::Responses, "gpt-4.1").unwrap(), Dialect::Chat);
    }

    #[test]
    fn test_resolve_model_for_converse() {
        let cfg = config("bedrock");
        assert_eq!(
            resolve_model(&cfg, Dialect::Converse, "claude-sonnet-4-20250514").unwrap(),
            "us.anthropic.claude-sonnet-4-20250514-v1:0"
        );
        let err = resolve_model(&cfg, Dialect::Converse, "gpt-4o").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ModelResolutionFailure);
        assert_eq!(resolve_model(&config("openai"), Dialect::Chat, "gpt-4o").unwrap(), "gpt-4o");
    }

    #[test]
    fn test_adaptor_endpoints() {
        let openai = ChannelAdaptor::select(ChannelType::Custom);
        assert_eq!(
            openai.endpoint("https://api.example.com/v1/", Dialect::Chat, "m"),
            "https://api.example.com/v1/chat/completions"
        );
        let bedrock = ChannelAdaptor::select(ChannelType::Bedrock);
        assert_eq!(
            bedrock.endpoint("https://bedrock", Dialect::Converse, "amazon.nova-pro-v1:0"),
            "https://bedrock/model/amazon.nova-pro-v1%3A0/converse"
        );
    }

    #[test]
    fn test_parse_inbound() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}],"stream":true}"#;
        let req = InboundRequest::parse(Dialect::Chat, body).unwrap();
        assert_eq!(req.dialect(), Dialect::Chat);
        assert_eq!(req.model(), "gpt-4o");
        assert!(req.stream());

        let err = InboundRequest::parse(Dialect::Messages, b"{}").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConversionFailure);
    }

    #[test]
    fn test_carry_over_keeps_conversation_state() {
        let original: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4.1",
            "input": "hello",
            "previous_response_id": "resp_1",
            "store": true,
            "truncation": "auto"
        }))
        .unwrap();
        let mut req = responses::unified_to_request(&responses::request_to_unified(&original));
        carry_over(&mut req, &original);
        assert_eq!(req.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(req.store, Some(true));
        assert_eq!(req.extra["truncation"], "auto");
    }

    #[test]
    fn test_prompt_messages_include_instructions() {
        let mut req = UnifiedRequest::default();
        req.instructions = Some("be brief".to_string());
        req.messages.push(Message::text(Role::User, "hi"));
        let prompt = prompt_messages(&req);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
    }
}
