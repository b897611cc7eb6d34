//! Tool and reasoning semantics shared by every converter.
//!
//! [`apply`] runs on the unified request before any dialect conversion. It
//! enforces the sampling rules of reasoning and search model families, fills in
//! reasoning effort, and makes the tool choice consistent with the tools that
//! will actually be sent.

use super::unified::{ContentPart, ReasoningConfig, ToolChoice, UnifiedRequest};
use super::Dialect;
use serde_json::{json, Value};

/// Reasoning effort levels a model family accepts, and what to use when the
/// caller's value is missing or not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningProfile {
    pub allowed: &'static [&'static str],
    pub default: &'static str,
}

const O_SERIES: ReasoningProfile = ReasoningProfile {
    allowed: &["low", "medium", "high"],
    default: "high",
};

const GPT5: ReasoningProfile = ReasoningProfile {
    allowed: &["minimal", "low", "medium", "high"],
    default: "high",
};

const DEEP_RESEARCH: ReasoningProfile = ReasoningProfile {
    allowed: &["medium"],
    default: "medium",
};

/// Model name without any `vendor/` routing prefix, lowercased.
fn base_name(model: &str) -> String {
    model
        .rsplit('/')
        .next()
        .unwrap_or(model)
        .trim()
        .to_lowercase()
}

/// `o1`, `o3-mini`, `o4-mini-deep-research`, `gpt-5`, `gpt-5-mini`; not `gpt-5-chat-latest`.
pub fn is_reasoning_model(model: &str) -> bool {
    let name = base_name(model);
    let mut chars = name.chars();
    if chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
        return true;
    }
    name.starts_with("gpt-5") && !name.contains("-chat")
}

/// Search-only variants reject sampling parameters.
pub fn is_search_model(model: &str) -> bool {
    base_name(model).contains("-search")
}

pub fn reasoning_profile(model: &str) -> Option<ReasoningProfile> {
    if !is_reasoning_model(model) {
        return None;
    }
    let name = base_name(model);
    if name.contains("deep-research") {
        Some(DEEP_RESEARCH)
    } else if name.starts_with("gpt-5") {
        Some(GPT5)
    } else {
        Some(O_SERIES)
    }
}

/// Enforce model-family parameter rules and tool-choice consistency for `target`.
pub fn apply(req: &mut UnifiedRequest, target: Dialect) {
    if let Some(profile) = reasoning_profile(&req.model) {
        match target {
            Dialect::Responses => req.temperature = None,
            _ => {
                if req.temperature.is_some() {
                    req.temperature = Some(1.0);
                }
            }
        }
        req.top_p = None;
        req.hoist_system_messages();

        let reasoning = req.reasoning.get_or_insert_with(ReasoningConfig::default);
        let requested = reasoning
            .effort
            .as_deref()
            .map(|e| e.trim().to_lowercase());
        match requested {
            Some(ref effort) if profile.allowed.contains(&effort.as_str()) => {
                reasoning.effort = Some(effort.clone());
            }
            other => {
                if let Some(effort) = other.filter(|e| !e.is_empty()) {
                    tracing::debug!(
                        model = %req.model,
                        requested = %effort,
                        default = profile.default,
                        "Overriding disallowed reasoning effort"
                    );
                }
                reasoning.effort = Some(profile.default.to_string());
            }
        }
    }

    if is_search_model(&req.model) {
        req.temperature = None;
        req.top_p = None;
        req.presence_penalty = None;
        req.frequency_penalty = None;
        req.n = None;
    }

    let missing_named = match req.tool_choice {
        Some(ToolChoice::Named(ref name)) => !req.function_tool_names().contains(&name.as_str()),
        _ => false,
    };
    if req.tools.is_empty() {
        req.tool_choice = None;
    } else if missing_named {
        tracing::debug!("Named tool choice has no matching tool, using auto");
        req.tool_choice = Some(ToolChoice::Auto);
    }
}

/// Parse any of the tool-choice shapes callers send.
///
/// Accepts the strings `auto`/`none`/`required`/`any`, `{type:"function", function:{name}}`,
/// `{type:"function", name}`, `{type:"tool", name}`, `{type:"auto"|"any"|"none"}` and a
/// bare `{name}`. Whitespace-only strings and `null` mean no choice at all.
pub fn normalize_tool_choice_value(value: &Value) -> Option<ToolChoice> {
    match value {
        Value::String(s) => parse_mode(s.trim()),
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str).map(str::trim);
            let name = map
                .get("function")
                .and_then(|f| f.get("name"))
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty());
            match (kind, name) {
                (Some("function" | "tool") | None, Some(name)) => {
                    Some(ToolChoice::Named(name.to_string()))
                }
                (Some(kind), None) => parse_mode(kind).or(Some(ToolChoice::Auto)),
                (Some(_), Some(_)) | (None, None) => Some(ToolChoice::Auto),
            }
        }
        _ => None,
    }
}

fn parse_mode(mode: &str) -> Option<ToolChoice> {
    match mode {
        "" => None,
        "auto" => Some(ToolChoice::Auto),
        "none" => Some(ToolChoice::None),
        "required" | "any" => Some(ToolChoice::Required),
        "function" | "tool" => Some(ToolChoice::Auto),
        other => Some(ToolChoice::Mode(other.to_string())),
    }
}

/// Render the canonical wire shape for `target`.
///
/// Chat: `{type:"function", function:{name}}`; responses: `{type:"function", name}`.
/// Converse and message dialects have their own tool-choice types, built by their converters.
pub fn normalize_tool_choice(choice: &ToolChoice, target: Dialect) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Mode(mode) => json!(mode),
        ToolChoice::Named(name) => match target {
            Dialect::Responses => json!({"type": "function", "name": name}),
            _ => json!({"type": "function", "function": {"name": name}}),
        },
    }
}

/// Reasoning a target dialect cannot carry becomes plain text from its summary.
/// Without a summary the part is dropped.
pub fn summarize_reasoning(part: &ContentPart) -> Option<ContentPart> {
    match part {
        ContentPart::Reasoning { summary, encrypted } => {
            match summary.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(text) => Some(ContentPart::Text {
                    text: text.to_string(),
                }),
                None => {
                    tracing::debug!(
                        encrypted = encrypted.is_some(),
                        "Dropping reasoning part without summary"
                    );
                    None
                }
            }
        }
        other => Some(other.clone()),
    }
}
