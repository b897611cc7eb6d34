use crate::config::GatewayConfig;
use crate::dispatch::{self, GatewayResponse, InboundRequest, RequestContext};
use crate::error::GatewayError;
use crate::logging::{SharedLogger, UsageSink};
use crate::media::MediaFetcher;
use crate::realtime;
use crate::relay::{self, SseEvent, UsageFinalizer};
use crate::tokens::TokenCounter;
use crate::translate::unified::Message;
use crate::translate::Dialect;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
    pub usage_sink: Arc<dyn UsageSink>,
    pub counter: TokenCounter,
    pub media: MediaFetcher,
}

impl AppState {
    /// State whose usage reports go to the operational log.
    pub fn new(config: GatewayConfig, client: reqwest::Client, logger: SharedLogger) -> Self {
        Self {
            counter: TokenCounter::new(config.approximate_tokens),
            media: MediaFetcher::new(client.clone()).with_limit(config.max_media_bytes),
            usage_sink: Arc::new(logger.clone()),
            config,
            client,
            logger,
        }
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    pub(crate) fn finalizer(&self, ctx: RequestContext, prompt: Vec<Message>) -> UsageFinalizer {
        UsageFinalizer::new(
            ctx,
            self.usage_sink.clone(),
            self.counter,
            self.config.count_media_tokens.then(|| self.media.clone()),
            prompt,
            self.config.pricing.quota_per_usd,
        )
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/realtime", get(handle_realtime))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    handle_dialect(state, Dialect::Chat, headers, body).await
}

async fn handle_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_dialect(state, Dialect::Responses, headers, body).await
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_dialect(state, Dialect::Messages, headers, body).await
}

async fn handle_dialect(
    state: Arc<AppState>,
    dialect: Dialect,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = match InboundRequest::parse(dialect, &body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse {} request: {}", dialect, e));
            return error_response(dialect, StatusCode::BAD_REQUEST, &e);
        }
    };

    match dispatch::dispatch(&state, inbound, &headers).await {
        Ok(GatewayResponse::Json(value)) => Json(value).into_response(),
        Ok(GatewayResponse::Stream(events)) => {
            let events = events.map(|event| -> Result<Event, Infallible> { Ok(sse_event(event)) });
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("{} request failed: {}", dialect, e));
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(dialect, status, &e)
        }
    }
}

fn sse_event(event: SseEvent) -> Event {
    let sse = Event::default().data(event.data);
    match event.event {
        Some(name) => sse.event(name),
        None => sse,
    }
}

fn error_response(dialect: Dialect, status: StatusCode, err: &GatewayError) -> Response {
    (status, Json(relay::error_body(dialect, err))).into_response()
}

#[derive(Debug, Deserialize)]
struct RealtimeParams {
    model: String,
}

async fn handle_realtime(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RealtimeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let protocols: Vec<String> = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    state.logger.info(
        "realtime",
        format!("Session requested: model={} protocols={}", params.model, protocols.len()),
    );

    ws.protocols(protocols.clone())
        .on_upgrade(move |socket| async move {
            realtime::proxy_session(state, socket, params.model, protocols).await;
        })
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&String> = state.config.models.keys().collect();
    names.sort();
    let models: Vec<serde_json::Value> = names
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": state.config.channel.name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}
