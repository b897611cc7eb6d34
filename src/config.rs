use crate::channels::{ChannelPreset, ChannelType};
use crate::error::{GatewayError, Result};
use crate::translate::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Replace real tokenization with the `len * 0.38` estimate process-wide.
    #[serde(default)]
    pub approximate_tokens: bool,
    /// Fetch and measure images/audio when estimating prompt tokens.
    #[serde(default = "default_true")]
    pub count_media_tokens: bool,
    /// Largest remote image body the gateway will download.
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: u64,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<ChannelType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Explicit per-channel dialect override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Dialect>,
    /// Downgrade structured-response callers to the chat dialect.
    #[serde(default)]
    pub chat_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_quota_per_usd")]
    pub quota_per_usd: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            quota_per_usd: default_quota_per_usd(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_port() -> u16 {
    4222
}

fn default_true() -> bool {
    true
}

fn default_max_media_bytes() -> u64 {
    crate::media::DEFAULT_MAX_MEDIA_BYTES
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_quota_per_usd() -> f64 {
    500_000.0
}

impl GatewayConfig {
    /// Minimal config for a named preset; everything else defaulted.
    pub fn for_channel(name: &str) -> Self {
        let preset = ChannelPreset::from_name(name);
        Self {
            port: default_port(),
            approximate_tokens: false,
            count_media_tokens: true,
            max_media_bytes: default_max_media_bytes(),
            channel: ChannelConfig {
                name: name.to_string(),
                channel_type: preset.map(|p| p.channel_type),
                base_url: None,
                api_key: None,
                api_key_env: preset
                    .map_or_else(default_api_key_env, |p| p.default_api_key_env.to_string()),
                format: None,
                chat_fallback: false,
            },
            models: HashMap::new(),
            pricing: PricingConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(GatewayError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the effective base URL (config override or channel preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.channel.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let preset = ChannelPreset::from_name(&self.channel.name).ok_or_else(|| {
            GatewayError::config(format!(
                "Unknown channel '{}' and no base_url configured. Known channels: {}",
                self.channel.name,
                ChannelPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve the API key: inline value first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.channel.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.channel.api_key_env).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{}' not set. Set it with your channel API key.",
                self.channel.api_key_env
            ))
        })
    }

    /// The channel type, from config or from the named preset. Unknown names are
    /// treated as OpenAI-compatible chat endpoints.
    pub fn channel_type(&self) -> ChannelType {
        self.channel
            .channel_type
            .or_else(|| ChannelPreset::from_name(&self.channel.name).map(|p| p.channel_type))
            .unwrap_or(ChannelType::Custom)
    }

    /// Whether the upstream accepts structured-response requests.
    pub fn supports_responses(&self) -> bool {
        match self.channel.format {
            Some(Dialect::Responses) => true,
            Some(_) => false,
            None => match self.channel_type() {
                ChannelType::OpenAi | ChannelType::Azure => true,
                ChannelType::Custom => ChannelPreset::from_name(&self.channel.name)
                    .is_some_and(|p| p.supports_responses),
                ChannelType::Anthropic | ChannelType::Bedrock => false,
            },
        }
    }

    /// Map a client-facing model name onto the provider's name for it.
    pub fn upstream_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    /// WebSocket base for the realtime channel.
    pub fn realtime_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.realtime.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let http = self.effective_base_url()?;
        Ok(http
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1))
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("dialect-gateway.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("dialect-gateway")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("dialect-gateway").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("dialect-gateway").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".dialect-gateway.toml"));
    }

    paths
}

pub fn search_paths_for_display() -> Vec<String> {
    config_search_paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect()
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
