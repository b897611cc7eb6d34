//! Image payload fetching for inlining and dimension probes.
//!
//! Images reach the gateway either as inline `data:` URLs or as remote URLs.
//! Converse upstreams and message-style callers need raw bytes, and high-detail
//! token counting needs pixel dimensions; both go through [`MediaFetcher`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;

use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::{
    ContentBlock, ImageSource, MessageContent, MessagesRequest, TypedContentBlock,
};
use crate::translate::unified::{ContentPart, MessageContent as UnifiedContent, UnifiedRequest};

/// Decoded image bytes plus their media type.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub media_type: String,
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.data))
    }

    /// Pixel dimensions, when the bytes are a recognised image format.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let size = imagesize::blob_size(&self.data).ok()?;
        Some((
            u32::try_from(size.width).ok()?,
            u32::try_from(size.height).ok()?,
        ))
    }
}

/// Split a `data:<type>;base64,<payload>` URL. Returns None for anything else.
pub fn decode_data_url(url: &str) -> Option<Result<MediaPayload>> {
    let rest = url.strip_prefix("data:")?;
    let Some((header, payload)) = rest.split_once(',') else {
        return Some(Err(GatewayError::conversion(
            "image decode",
            "data URL has no payload separator",
        )));
    };
    let media_type = header
        .strip_suffix(";base64")
        .unwrap_or(header)
        .to_string();
    Some(
        STANDARD
            .decode(payload.trim())
            .map(|data| MediaPayload {
                media_type: if media_type.is_empty() {
                    sniff_media_type(&data)
                } else {
                    media_type
                },
                data,
            })
            .map_err(|e| GatewayError::conversion("image decode", e.to_string())),
    )
}

fn sniff_media_type(data: &[u8]) -> String {
    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// 20 MiB, the largest image the upstream vision endpoints accept.
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    pub fn with_limit(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Resolve a data URL in place or download a remote one.
    pub async fn fetch(&self, url: &str) -> Result<MediaPayload> {
        if let Some(decoded) = decode_data_url(url) {
            return decoded;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::conversion("image fetch", e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::conversion(
                "image fetch",
                format!("remote image returned status {}", status.as_u16()),
            ));
        }
        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"));
        if let Some(len) = response.content_length().filter(|len| *len > self.max_bytes) {
            return Err(self.too_large(len));
        }

        let mut data = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| GatewayError::conversion("image fetch", e.to_string()))?;
            let len = (data.len() + chunk.len()) as u64;
            if len > self.max_bytes {
                return Err(self.too_large(len));
            }
            data.extend_from_slice(&chunk);
        }

        let media_type = header_type.unwrap_or_else(|| sniff_media_type(&data));
        tracing::debug!(media_type = %media_type, bytes = data.len(), "Fetched remote image");
        Ok(MediaPayload { media_type, data })
    }

    fn too_large(&self, len: u64) -> GatewayError {
        GatewayError::conversion(
            "image fetch",
            format!("remote image is {} bytes, limit is {}", len, self.max_bytes),
        )
    }

    /// Replace every URL-sourced image block with an inline base64 block.
    pub async fn inline_message_images(&self, req: &mut MessagesRequest) -> Result<()> {
        for message in &mut req.messages {
            let MessageContent::Blocks(ref mut blocks) = message.content else {
                continue;
            };
            for block in blocks.iter_mut() {
                if let ContentBlock::Typed(TypedContentBlock::Image { source }) = block {
                    if let ImageSource::Url { url } = source {
                        let payload = self.fetch(url).await?;
                        *source = ImageSource::Base64 {
                            media_type: payload.media_type,
                            data: STANDARD.encode(&payload.data),
                        };
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace every remote image part with a data URL.
    pub async fn inline_images(&self, req: &mut UnifiedRequest) -> Result<()> {
        for message in &mut req.messages {
            let UnifiedContent::Parts(ref mut parts) = message.content else {
                continue;
            };
            for part in parts.iter_mut() {
                if let ContentPart::Image { url, .. } = part {
                    if !url.starts_with("data:") {
                        *url = self.fetch(url).await?.to_data_url();
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1x1 transparent PNG.
    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn test_decode_data_url() {
        let url = format!("data:image/png;base64,{PNG_1X1}");
        let payload = decode_data_url(&url).unwrap().unwrap();
        assert_eq!(payload.media_type, "image/png");
        assert_eq!(payload.dimensions(), Some((1, 1)));
        assert_eq!(payload.to_data_url(), url);
    }

    #[test]
    fn test_missing_media_type_is_sniffed() {
        let url = format!("data:;base64,{PNG_1X1}");
        let payload = decode_data_url(&url).unwrap().unwrap();
        assert_eq!(payload.media_type, "image/png");
    }

    #[test]
    fn test_non_data_url_is_not_decoded() {
        assert!(decode_data_url("https://example.com/cat.png").is_none());
        assert!(decode_data_url("data:image/png;base64").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_oversized_remote_image_is_rejected() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;
        let bytes = STANDARD.decode(PNG_1X1).unwrap();
        Mock::given(method("GET"))
            .and(path("/small.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&server)
            .await;

        let fetcher = MediaFetcher::new(reqwest::Client::new()).with_limit(1024);
        let err = fetcher
            .fetch(&format!("{}/huge.png", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConversionFailure);
        assert!(err.to_string().contains("limit is 1024"));

        let payload = fetcher.fetch(&format!("{}/small.png", server.uri())).await.unwrap();
        assert_eq!(payload.dimensions(), Some((1, 1)));
    }

    #[tokio::test]
    async fn test_inline_message_images_fetches_remote() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let bytes = STANDARD.decode(PNG_1X1).unwrap();
        Mock::given(method("GET"))
            .and(path("/cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&server)
            .await;

        let mut req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "url", "url": format!("{}/cat.png", server.uri())}},
                {"type": "text", "text": "what is this?"}
            ]}]
        }))
        .unwrap();

        let fetcher = MediaFetcher::new(reqwest::Client::new());
        fetcher.inline_message_images(&mut req).await.unwrap();

        let MessageContent::Blocks(ref blocks) = req.messages[0].content else {
            panic!("expected blocks");
        };
        match &blocks[0] {
            ContentBlock::Typed(TypedContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            }) => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, PNG_1X1);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }
}
