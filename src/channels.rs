//! Built-in channel presets for common LLM providers.
//!
//! A channel is one upstream account. Its [`ChannelType`] decides which provider
//! dialects it can speak; the preset fills in the base URL and the environment
//! variable holding the credential.

use serde::{Deserialize, Serialize};

/// The closed set of upstream channel kinds the dispatcher knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// OpenAI itself: chat completions and structured responses.
    OpenAi,
    /// Azure-hosted OpenAI deployments.
    Azure,
    /// Message-style provider, served by passthrough.
    Anthropic,
    /// Converse-API hosted model families.
    Bedrock,
    /// Any OpenAI-compatible chat endpoint.
    Custom,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::OpenAi => "openai",
            ChannelType::Azure => "azure",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Bedrock => "bedrock",
            ChannelType::Custom => "custom",
        }
    }
}

/// Built-in channel presets. Users name a preset in their config and only
/// override what differs.
#[derive(Debug, Clone)]
pub struct ChannelPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub channel_type: ChannelType,
    pub default_api_key_env: &'static str,
    /// Whether the upstream accepts the structured-response dialect.
    pub supports_responses: bool,
}

const PRESETS: &[ChannelPreset] = &[
    ChannelPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        channel_type: ChannelType::OpenAi,
        default_api_key_env: "OPENAI_API_KEY",
        supports_responses: true,
    },
    ChannelPreset {
        name: "azure",
        base_url: "https://example.openai.azure.com/openai/v1",
        channel_type: ChannelType::Azure,
        default_api_key_env: "AZURE_OPENAI_API_KEY",
        supports_responses: true,
    },
    ChannelPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        channel_type: ChannelType::Custom,
        default_api_key_env: "OPENROUTER_API_KEY",
        supports_responses: false,
    },
    ChannelPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        channel_type: ChannelType::Custom,
        default_api_key_env: "GROQ_API_KEY",
        supports_responses: false,
    },
    ChannelPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        channel_type: ChannelType::Custom,
        default_api_key_env: "DEEPSEEK_API_KEY",
        supports_responses: false,
    },
    ChannelPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com",
        channel_type: ChannelType::Anthropic,
        default_api_key_env: "ANTHROPIC_API_KEY",
        supports_responses: false,
    },
    ChannelPreset {
        name: "bedrock",
        base_url: "https://bedrock-runtime.us-east-1.amazonaws.com",
        channel_type: ChannelType::Bedrock,
        default_api_key_env: "AWS_BEARER_TOKEN_BEDROCK",
        supports_responses: false,
    },
];

impl ChannelPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ChannelPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ChannelPreset] {
        PRESETS
    }
}

/// Converse model identifiers for client-facing model names.
const CONVERSE_MODELS: &[(&str, &str)] = &[
    ("claude-3-haiku-20240307", "anthropic.claude-3-haiku-20240307-v1:0"),
    ("claude-3-5-haiku-20241022", "anthropic.claude-3-5-haiku-20241022-v1:0"),
    ("claude-3-5-sonnet-20240620", "anthropic.claude-3-5-sonnet-20240620-v1:0"),
    ("claude-3-5-sonnet-20241022", "anthropic.claude-3-5-sonnet-20241022-v2:0"),
    ("claude-3-7-sonnet-20250219", "us.anthropic.claude-3-7-sonnet-20250219-v1:0"),
    ("claude-sonnet-4-20250514", "us.anthropic.claude-sonnet-4-20250514-v1:0"),
    ("claude-opus-4-20250514", "us.anthropic.claude-opus-4-20250514-v1:0"),
    ("nova-micro", "amazon.nova-micro-v1:0"),
    ("nova-lite", "amazon.nova-lite-v1:0"),
    ("nova-pro", "amazon.nova-pro-v1:0"),
    ("llama3-3-70b-instruct", "us.meta.llama3-3-70b-instruct-v1:0"),
    ("mistral-large-2402", "mistral.mistral-large-2402-v1:0"),
];

/// Look up the converse-native identifier for a client model name. Names that
/// already look native (contain a `.` vendor prefix and a `:` revision) pass through.
#[must_use]
pub fn converse_model_id(model: &str) -> Option<String> {
    if let Some((_, id)) = CONVERSE_MODELS.iter().find(|(name, _)| *name == model) {
        return Some((*id).to_string());
    }
    if model.contains('.') && model.contains(':') {
        return Some(model.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_channels() {
        assert!(ChannelPreset::from_name("openai").is_some());
        assert!(ChannelPreset::from_name("Bedrock").is_some()); // case-insensitive
        assert!(ChannelPreset::from_name("unknown_channel").is_none());
    }

    #[test]
    fn test_only_openai_like_presets_speak_responses() {
        for preset in ChannelPreset::all() {
            if preset.supports_responses {
                assert!(matches!(
                    preset.channel_type,
                    ChannelType::OpenAi | ChannelType::Azure
                ));
            }
        }
    }

    #[test]
    fn test_converse_model_lookup() {
        assert_eq!(
            converse_model_id("nova-pro").as_deref(),
            Some("amazon.nova-pro-v1:0")
        );
        assert_eq!(
            converse_model_id("amazon.titan-text-express-v1:0").as_deref(),
            Some("amazon.titan-text-express-v1:0")
        );
        assert!(converse_model_id("gpt-4o").is_none());
    }
}
