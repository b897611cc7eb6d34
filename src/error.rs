//! Error types for the gateway.
//!
//! Every failure maps onto one [`ErrorKind`], which decides how the caller sees it:
//! rejected before any network call, surfaced as an upstream-facing error, or only
//! logged (a skipped stream event).

use thiserror::Error;

/// Coarse classification used for status codes and operational logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFeature,
    ConversionFailure,
    UpstreamTransport,
    StreamParseSkip,
    WriteFailure,
    ModelResolutionFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFeature => "unsupported_feature",
            ErrorKind::ConversionFailure => "conversion_failure",
            ErrorKind::UpstreamTransport => "upstream_error",
            ErrorKind::StreamParseSkip => "stream_parse_skip",
            ErrorKind::WriteFailure => "write_failure",
            ErrorKind::ModelResolutionFailure => "model_not_found",
            ErrorKind::Internal => "internal_error",
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported feature: {feature} cannot be expressed in the {target} dialect")]
    UnsupportedFeature { feature: String, target: String },

    #[error("Conversion failed during {stage}: {message}")]
    Conversion { stage: &'static str, message: String },

    #[error("Image fetch failed ({detail} detail{}): {message}", dimensions_suffix(.dimensions))]
    ImageFetch {
        detail: String,
        dimensions: Option<(u32, u32)>,
        message: String,
    },

    #[error("Upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        error_type: Option<String>,
        message: String,
    },

    #[error("Skipped malformed stream event: {message}")]
    StreamParse { message: String },

    #[error("Stream write failed: {message}")]
    WriteFailure { message: String },

    #[error("Model '{model}' has no mapping for the {channel} channel")]
    ModelResolution { model: String, channel: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

fn dimensions_suffix(dimensions: &Option<(u32, u32)>) -> String {
    dimensions
        .map(|(w, h)| format!(", {w}x{h}"))
        .unwrap_or_default()
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            target: target.into(),
        }
    }

    pub fn conversion(stage: &'static str, msg: impl Into<String>) -> Self {
        Self::Conversion {
            stage,
            message: msg.into(),
        }
    }

    pub fn image_fetch(
        detail: impl Into<String>,
        dimensions: Option<(u32, u32)>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ImageFetch {
            detail: detail.into(),
            dimensions,
            message: msg.into(),
        }
    }

    pub fn upstream(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            error_type: None,
            message: msg.into(),
        }
    }

    pub fn upstream_typed(status: u16, error_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            error_type: Some(error_type.into()),
            message: msg.into(),
        }
    }

    pub fn stream_parse(msg: impl Into<String>) -> Self {
        Self::StreamParse {
            message: msg.into(),
        }
    }

    pub fn write_failure(msg: impl Into<String>) -> Self {
        Self::WriteFailure {
            message: msg.into(),
        }
    }

    pub fn model_resolution(model: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::ModelResolution {
            model: model.into(),
            channel: channel.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            GatewayError::Conversion { .. } | GatewayError::ImageFetch { .. } => {
                ErrorKind::ConversionFailure
            }
            GatewayError::Upstream { .. } | GatewayError::Http(_) => ErrorKind::UpstreamTransport,
            GatewayError::StreamParse { .. } => ErrorKind::StreamParseSkip,
            GatewayError::WriteFailure { .. } => ErrorKind::WriteFailure,
            GatewayError::ModelResolution { .. } => ErrorKind::ModelResolutionFailure,
            GatewayError::Config { .. }
            | GatewayError::Io(_)
            | GatewayError::Json(_)
            | GatewayError::Toml(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the caller receives for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::UnsupportedFeature { .. } | GatewayError::ModelResolution { .. } => 400,
            GatewayError::Upstream { status, .. } => status.unwrap_or(502),
            GatewayError::Http(e) => e.status().map_or(502, |s| s.as_u16()),
            _ => 500,
        }
    }

    /// Provider-side error type, when the upstream reported one.
    pub fn upstream_error_type(&self) -> Option<&str> {
        match self {
            GatewayError::Upstream { error_type, .. } => error_type.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
