//! Model-family-aware token counting for text, image and audio content.
//!
//! Used to estimate prompt and completion usage when an upstream never reports
//! it. The tokenizer registry is built once on first use from a static family
//! table and never mutated afterwards.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::error::{GatewayError, Result};
use crate::media::MediaFetcher;
use crate::translate::unified::{ContentPart, ImageDetail, Message, MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    O200k,
    Cl100k,
}

/// Model name prefix to encoding; the longest matching prefix wins.
const FAMILY_TABLE: &[(&str, Encoding)] = &[
    ("gpt-4o", Encoding::O200k),
    ("gpt-4.1", Encoding::O200k),
    ("gpt-4.5", Encoding::O200k),
    ("gpt-5", Encoding::O200k),
    ("chatgpt-4o", Encoding::O200k),
    ("o1", Encoding::O200k),
    ("o3", Encoding::O200k),
    ("o4", Encoding::O200k),
    ("codex", Encoding::O200k),
    ("gpt-4", Encoding::Cl100k),
    ("gpt-3.5", Encoding::Cl100k),
    ("text-embedding", Encoding::Cl100k),
];

struct Registry {
    o200k: Option<CoreBPE>,
    cl100k: Option<CoreBPE>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let o200k = tiktoken_rs::o200k_base()
        .map_err(|e| tracing::warn!(error = %e, "o200k tokenizer unavailable"))
        .ok();
    let cl100k = tiktoken_rs::cl100k_base()
        .map_err(|e| tracing::warn!(error = %e, "cl100k tokenizer unavailable"))
        .ok();
    Registry { o200k, cl100k }
});

fn encoding_for(model: &str) -> Encoding {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    FAMILY_TABLE
        .iter()
        .filter(|(prefix, _)| name.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(Encoding::Cl100k, |(_, enc)| *enc)
}

/// Load both tokenizers now instead of on the first request.
pub fn preload_tokenizers() {
    Lazy::force(&REGISTRY);
}

/// Byte-length estimate used in approximate mode and when no tokenizer loads.
fn approximate(text: &str) -> u64 {
    (text.len() as f64 * 0.38).floor() as u64
}

const TOKENS_PER_MESSAGE: u64 = 3;
const TOKENS_PER_NAME: u64 = 1;
const REPLY_PRIMING: u64 = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter {
    approximate: bool,
}

impl TokenCounter {
    pub fn new(approximate: bool) -> Self {
        Self { approximate }
    }

    pub fn count_text(&self, text: &str, model: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        if self.approximate {
            return approximate(text);
        }
        let bpe = match encoding_for(model) {
            Encoding::O200k => REGISTRY.o200k.as_ref(),
            Encoding::Cl100k => REGISTRY.cl100k.as_ref(),
        };
        match bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            None => approximate(text),
        }
    }

    /// Tokens for one image. Low detail needs no pixels except for the
    /// area-priced family, everything else fetches the image to measure it.
    pub async fn count_image(
        &self,
        fetcher: &MediaFetcher,
        url: &str,
        detail: &ImageDetail,
        model: &str,
    ) -> Result<u64> {
        if *detail == ImageDetail::Low && !is_area_priced(model) {
            return image_tokens((0, 0), detail, model);
        }
        let payload = fetcher.fetch(url).await.map_err(|e| {
            GatewayError::image_fetch(detail.as_str(), None, e.to_string())
        })?;
        let dims = payload.dimensions().ok_or_else(|| {
            GatewayError::image_fetch(
                detail.as_str(),
                None,
                format!("unrecognised image format {}", payload.media_type),
            )
        })?;
        image_tokens(dims, detail, model)
    }

    /// Prompt tokens for a message list. Media parts are only counted when a
    /// fetcher is supplied.
    pub async fn count_messages(
        &self,
        fetcher: Option<&MediaFetcher>,
        messages: &[Message],
        model: &str,
    ) -> Result<u64> {
        let mut total = 0;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            total += self.count_text(message.role.as_str(), model);
            if let Some(ref name) = message.name {
                total += TOKENS_PER_NAME + self.count_text(name, model);
            }
            match message.content {
                MessageContent::Text(ref text) => total += self.count_text(text, model),
                MessageContent::Parts(ref parts) => {
                    for part in parts {
                        total += self.count_part(fetcher, part, model).await?;
                    }
                }
            }
            for call in &message.tool_calls {
                total += self.count_text(&call.name, model);
                total += self.count_text(&call.arguments, model);
            }
        }
        Ok(total + REPLY_PRIMING)
    }

    async fn count_part(
        &self,
        fetcher: Option<&MediaFetcher>,
        part: &ContentPart,
        model: &str,
    ) -> Result<u64> {
        Ok(match part {
            ContentPart::Text { text } => self.count_text(text, model),
            ContentPart::ToolResult { content, .. } => self.count_text(content, model),
            ContentPart::Reasoning { summary, .. } => summary
                .as_deref()
                .map_or(0, |s| self.count_text(s, model)),
            ContentPart::Image { url, detail } => match fetcher {
                Some(fetcher) => self.count_image(fetcher, url, detail, model).await?,
                None => 0,
            },
            ContentPart::Audio { data, format } => match fetcher {
                Some(_) => audio_tokens(data, format),
                None => 0,
            },
            ContentPart::Unknown(_) => 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageCost {
    base: u64,
    tile: u64,
}

const DEFAULT_IMAGE_COST: ImageCost = ImageCost { base: 85, tile: 170 };

/// Per-family tile pricing; first match wins, so specific names come first.
const IMAGE_COSTS: &[(&str, ImageCost)] = &[
    ("gpt-4o-mini", ImageCost { base: 2833, tile: 5667 }),
    ("computer-use", ImageCost { base: 65, tile: 129 }),
    ("gpt-4o", DEFAULT_IMAGE_COST),
    ("gpt-4.1", DEFAULT_IMAGE_COST),
    ("gpt-4.5", DEFAULT_IMAGE_COST),
];

const O_SERIES_IMAGE_COST: ImageCost = ImageCost { base: 75, tile: 150 };

const MAX_LONG_EDGE: f64 = 2048.0;
const MAX_SHORT_EDGE: f64 = 768.0;
const TILE_EDGE: f64 = 512.0;
const AREA_PRICED_LONG_EDGE: f64 = 1568.0;
const AREA_PRICED_PIXELS_PER_TOKEN: f64 = 750.0;

fn is_area_priced(model: &str) -> bool {
    model.to_lowercase().contains("claude")
}

fn image_cost(model: &str) -> ImageCost {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    if let Some((_, cost)) = IMAGE_COSTS.iter().find(|(family, _)| name.contains(family)) {
        return *cost;
    }
    if crate::translate::bridge::is_reasoning_model(&name) && name.starts_with('o') {
        return O_SERIES_IMAGE_COST;
    }
    DEFAULT_IMAGE_COST
}

/// Image tokens from pixel dimensions. `Auto` detail is priced as `High`.
pub fn image_tokens(dims: (u32, u32), detail: &ImageDetail, model: &str) -> Result<u64> {
    let (w, h) = dims;

    if is_area_priced(model) {
        if w == 0 || h == 0 {
            return Err(GatewayError::image_fetch(detail.as_str(), Some(dims), "zero-sized image"));
        }
        let (w, h) = scale_to_fit(f64::from(w), f64::from(h), AREA_PRICED_LONG_EDGE);
        return Ok((w * h / AREA_PRICED_PIXELS_PER_TOKEN).round() as u64);
    }

    let cost = image_cost(model);
    if *detail == ImageDetail::Low {
        return Ok(cost.base);
    }
    if w == 0 || h == 0 {
        return Err(GatewayError::image_fetch(detail.as_str(), Some(dims), "zero-sized image"));
    }

    let (w, h) = scale_to_fit(f64::from(w), f64::from(h), MAX_LONG_EDGE);
    let short = w.min(h);
    let (w, h) = if short > MAX_SHORT_EDGE {
        let ratio = MAX_SHORT_EDGE / short;
        (w * ratio, h * ratio)
    } else {
        (w, h)
    };

    let tiles = (w / TILE_EDGE).ceil() as u64 * (h / TILE_EDGE).ceil() as u64;
    Ok(tiles * cost.tile + cost.base)
}

fn scale_to_fit(w: f64, h: f64, max_long_edge: f64) -> (f64, f64) {
    let long = w.max(h);
    if long > max_long_edge {
        let ratio = max_long_edge / long;
        (w * ratio, h * ratio)
    } else {
        (w, h)
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

const AUDIO_TOKENS_PER_SECOND: f64 = 10.0;
/// Bytes per second assumed for compressed formats (128 kbps).
const COMPRESSED_BYTES_PER_SECOND: f64 = 16_000.0;
const WAV_HEADER_LEN: usize = 44;

/// Tokens for an inline audio payload, from its duration.
pub fn audio_tokens(data_b64: &str, format: &str) -> u64 {
    let Ok(bytes) = STANDARD.decode(data_b64.trim()) else {
        tracing::debug!(format, "Audio payload is not valid base64, counting zero tokens");
        return 0;
    };
    let seconds = if format.eq_ignore_ascii_case("wav") {
        wav_duration(&bytes)
    } else {
        bytes.len() as f64 / COMPRESSED_BYTES_PER_SECOND
    };
    (seconds * AUDIO_TOKENS_PER_SECOND).ceil() as u64
}

fn wav_duration(bytes: &[u8]) -> f64 {
    let byte_rate = bytes
        .get(28..32)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map_or(0, u32::from_le_bytes);
    if byte_rate == 0 {
        return bytes.len() as f64 / COMPRESSED_BYTES_PER_SECOND;
    }
    bytes.len().saturating_sub(WAV_HEADER_LEN) as f64 / f64::from(byte_rate)
}
