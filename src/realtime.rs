//! Bidirectional WebSocket proxy for the live-audio channel.
//!
//! The caller's socket and the provider's socket are pumped by two loops
//! running under one `select!`; whichever side fails or closes first ends the
//! session. Usage arrives in `response.done` frames on the provider leg.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as UpstreamCloseFrame, Message as UpstreamMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::channels::ChannelType;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::UsageReport;
use crate::server::AppState;
use crate::translate::new_id;
use crate::usage::UsageRecord;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `{base}/realtime` with the model as an encoded query parameter.
fn realtime_url(base: &str, model: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(&format!("{}/realtime", base.trim_end_matches('/')))
        .map_err(|e| GatewayError::config(format!("Invalid realtime base URL {}: {}", base, e)))?;
    url.query_pairs_mut().append_pair("model", model);
    Ok(url.into())
}

/// Open the provider leg, mirroring the caller's offered subprotocols.
pub async fn connect_upstream(
    config: &GatewayConfig,
    model: &str,
    protocols: &[String],
) -> Result<UpstreamSocket> {
    let url = realtime_url(&config.realtime_base_url()?, model)?;
    let api_key = config.resolve_api_key()?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| GatewayError::config(format!("Invalid realtime URL {}: {}", url, e)))?;
    let header = |value: &str| {
        HeaderValue::from_str(value)
            .map_err(|e| GatewayError::config(format!("Invalid realtime header value: {}", e)))
    };

    let headers = request.headers_mut();
    match config.channel_type() {
        ChannelType::Azure => {
            headers.insert("api-key", header(&api_key)?);
        }
        _ => {
            headers.insert("authorization", header(&format!("Bearer {}", api_key))?);
        }
    }
    headers.insert("openai-beta", HeaderValue::from_static("realtime=v1"));
    if !protocols.is_empty() {
        headers.insert("sec-websocket-protocol", header(&protocols.join(", "))?);
    }

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| GatewayError::upstream(None, format!("Realtime connect failed: {}", e)))?;
    Ok(socket)
}

/// Usage carried by a `response.done` frame, if this frame is one.
pub fn usage_from_frame(text: &str) -> Option<UsageRecord> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame["type"] != "response.done" {
        return None;
    }
    let usage = frame["response"].get("usage").filter(|u| u.is_object())?;
    let count = |v: &Value| v.as_u64().unwrap_or(0);

    let mut record = UsageRecord::reported(
        count(&usage["input_tokens"]),
        count(&usage["output_tokens"]),
        usage["total_tokens"].as_u64(),
    );
    record.cached_tokens = count(&usage["input_token_details"]["cached_tokens"]);
    record.audio_tokens = count(&usage["input_token_details"]["audio_tokens"])
        + count(&usage["output_token_details"]["audio_tokens"]);
    Some(record)
}

fn to_upstream(msg: ClientMessage) -> Option<UpstreamMessage> {
    match msg {
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text)),
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        }))),
        // Each leg answers its own keepalives.
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

fn to_client(msg: UpstreamMessage) -> Option<ClientMessage> {
    match msg {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text)),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| ClientCloseFrame {
            code: u16::from(f.code),
            reason: f.reason,
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

/// Pump frames both ways until either side ends, then report the session's usage.
pub async fn proxy_session(
    state: Arc<AppState>,
    socket: WebSocket,
    model: String,
    protocols: Vec<String>,
) -> UsageRecord {
    let started = Instant::now();
    let upstream_model = state.config.upstream_model(&model);
    let mut usage = UsageRecord::default();

    let outcome = match connect_upstream(&state.config, &upstream_model, &protocols).await {
        Ok(upstream) => pump(socket, upstream, &mut usage).await,
        Err(e) => {
            let mut socket = socket;
            let _ = socket
                .send(ClientMessage::Close(Some(ClientCloseFrame {
                    code: 1011,
                    reason: "upstream unavailable".into(),
                })))
                .await;
            Err(e)
        }
    };

    if let Err(ref e) = outcome {
        tracing::warn!(error = %e, model = %model, "Realtime session ended with an error");
    }
    usage.finalize_total();

    let report = UsageReport {
        request_id: new_id("rt_"),
        client_dialect: "realtime".to_string(),
        target_dialect: "realtime".to_string(),
        model,
        upstream_model,
        stream: true,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        usage: usage.clone(),
        error_kind: outcome.as_ref().err().map(|e| e.kind().as_str().to_string()),
        error: outcome.as_ref().err().map(ToString::to_string),
    };
    state.usage_sink.record_usage(&report);
    usage
}

async fn pump(client: WebSocket, upstream: UpstreamSocket, usage: &mut UsageRecord) -> Result<()> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let inbound = async {
        while let Some(msg) = client_rx.next().await {
            let msg = msg.map_err(|e| GatewayError::write_failure(format!("client read failed: {}", e)))?;
            let closing = matches!(msg, ClientMessage::Close(_));
            if let Some(out) = to_upstream(msg) {
                upstream_tx
                    .send(out)
                    .await
                    .map_err(|e| GatewayError::upstream(None, format!("Realtime send failed: {}", e)))?;
            }
            if closing {
                break;
            }
        }
        Ok::<(), GatewayError>(())
    };

    let outbound = async {
        while let Some(msg) = upstream_rx.next().await {
            let msg = msg.map_err(|e| GatewayError::upstream(None, format!("Realtime read failed: {}", e)))?;
            if let UpstreamMessage::Text(ref text) = msg {
                if let Some(frame_usage) = usage_from_frame(text) {
                    usage.add(&frame_usage);
                }
            }
            let closing = matches!(msg, UpstreamMessage::Close(_));
            if let Some(out) = to_client(msg) {
                client_tx
                    .send(out)
                    .await
                    .map_err(|e| GatewayError::write_failure(format!("client write failed: {}", e)))?;
            }
            if closing {
                break;
            }
        }
        Ok::<(), GatewayError>(())
    };

    tokio::select! {
        result = inbound => result,
        result = outbound => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url_encodes_model() {
        let url = realtime_url("wss://api.openai.com/v1/", "gpt-4o-realtime-preview").unwrap();
        assert_eq!(url, "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview");

        let url = realtime_url("wss://api.openai.com/v1", "my model&x=1#frag").unwrap();
        assert_eq!(url, "wss://api.openai.com/v1/realtime?model=my+model%26x%3D1%23frag");

        assert!(realtime_url("not a url", "m").is_err());
    }

    #[test]
    fn test_usage_from_response_done() {
        let frame = serde_json::json!({
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "usage": {
                    "total_tokens": 230,
                    "input_tokens": 150,
                    "output_tokens": 80,
                    "input_token_details": {"cached_tokens": 20, "text_tokens": 100, "audio_tokens": 50},
                    "output_token_details": {"text_tokens": 30, "audio_tokens": 50}
                }
            }
        });
        let usage = usage_from_frame(&frame.to_string()).unwrap();
        assert_eq!(usage.prompt_tokens, 150);
        assert_eq!(usage.completion_tokens, 80);
        assert_eq!(usage.total_tokens, 230);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.audio_tokens, 100);
    }

    #[test]
    fn test_other_frames_carry_no_usage() {
        assert!(usage_from_frame(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).is_none());
        assert!(usage_from_frame(r#"{"type":"response.done","response":{"usage":null}}"#).is_none());
        assert!(usage_from_frame("not json").is_none());
    }

    #[test]
    fn test_frame_conversion() {
        let out = to_upstream(ClientMessage::Text("hello".to_string())).unwrap();
        assert_eq!(out, UpstreamMessage::Text("hello".to_string()));
        assert!(to_upstream(ClientMessage::Ping(vec![1])).is_none());

        let close = to_client(UpstreamMessage::Close(Some(UpstreamCloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })));
        match close {
            Some(ClientMessage::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
