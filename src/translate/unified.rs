//! The dialect-neutral request model every converter reads from or writes to.
//!
//! Content parts and tool declarations are closed tagged unions; anything a
//! parser does not recognise lands in an explicit `Unknown` variant carrying
//! the original JSON, so converters can decide what to do with it instead of
//! losing it silently.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// `developer` is the newer spelling of `system`; unknown roles are treated as user turns.
    pub fn parse(role: &str) -> Self {
        match role {
            "system" | "developer" => Role::System,
            "assistant" | "model" => Role::Assistant,
            "tool" | "function" => Role::Tool,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

impl ImageDetail {
    pub fn parse(detail: Option<&str>) -> Self {
        match detail {
            Some("low") => ImageDetail::Low,
            Some("high") => ImageDetail::High,
            _ => ImageDetail::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDetail::Auto => "auto",
            ImageDetail::Low => "low",
            ImageDetail::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// `url` is either a remote URL or an inline `data:` URL.
    Image {
        url: String,
        detail: ImageDetail,
    },
    /// Base64 payload plus its container format (`wav`, `mp3`, ...).
    Audio {
        data: String,
        format: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    /// Model reasoning. `encrypted` is an opaque payload only its issuer can verify.
    Reasoning {
        summary: Option<String>,
        encrypted: Option<String>,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(t) => vec![ContentPart::Text { text: t.clone() }],
            MessageContent::Parts(p) => p.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(t) => t.is_empty(),
            MessageContent::Parts(p) => p.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, kept byte-for-byte.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub name: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Lift tool results embedded in the content into standalone tool messages,
    /// keeping their position relative to the surrounding parts.
    pub fn split_tool_results(self) -> Vec<Message> {
        let MessageContent::Parts(parts) = self.content else {
            return vec![self];
        };
        if !parts.iter().any(|p| matches!(p, ContentPart::ToolResult { .. })) {
            return vec![Message {
                content: MessageContent::Parts(parts),
                ..self
            }];
        }

        let mut out = Vec::new();
        let mut pending: Vec<ContentPart> = Vec::new();
        for part in parts {
            match part {
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => {
                    if !pending.is_empty() {
                        out.push(Message::parts(self.role, std::mem::take(&mut pending)));
                    }
                    let content = if is_error {
                        format!("ERROR: {content}")
                    } else {
                        content
                    };
                    out.push(Message::tool_result(tool_call_id, content));
                }
                other => pending.push(other),
            }
        }
        if !pending.is_empty() {
            out.push(Message::parts(self.role, pending));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebSearchTool {
    pub search_context_size: Option<String>,
    pub allowed_domains: Vec<String>,
    pub user_location: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct McpTool {
    pub server_label: String,
    pub server_url: Option<String>,
    pub allowed_tools: Vec<String>,
    pub headers: Option<Value>,
    pub require_approval: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolDefinition {
    Function(FunctionTool),
    WebSearch(WebSearchTool),
    Mcp(McpTool),
    Unknown(Value),
}

impl ToolDefinition {
    pub fn function_name(&self) -> Option<&str> {
        match self {
            ToolDefinition::Function(f) => Some(f.name.as_str()),
            _ => None,
        }
    }
}

/// Canonical tool-choice directive. `Mode` keeps any other string verbatim (trimmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
    Mode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        strict: Option<bool>,
        description: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReasoningConfig {
    pub effort: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnifiedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Instructions already separated from the turn history.
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub n: Option<u32>,
    pub stop: Vec<String>,
    pub max_output_tokens: Option<u64>,
    pub seed: Option<i64>,
    pub user: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    pub response_format: Option<ResponseFormat>,
    pub reasoning: Option<ReasoningConfig>,
    pub stream: bool,
    /// Stored prompt template reference; only the structured-response dialect has one.
    pub prompt_template: Option<Value>,
    /// Background execution requested; only the structured-response dialect has one.
    pub background: bool,
}

impl UnifiedRequest {
    pub fn function_tool_names(&self) -> Vec<&str> {
        self.tools.iter().filter_map(ToolDefinition::function_name).collect()
    }

    /// Pull every system message out of the history, joining their text.
    /// Existing `instructions` stay in front.
    pub fn hoist_system_messages(&mut self) {
        let mut collected: Vec<String> = self.instructions.take().into_iter().collect();
        self.messages.retain(|m| {
            if m.role == Role::System {
                let text = m.content.text();
                if !text.is_empty() {
                    collected.push(text);
                }
                false
            } else {
                true
            }
        });
        if !collected.is_empty() {
            self.instructions = Some(collected.join("\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hoist_system_messages() {
        let mut req = UnifiedRequest {
            model: "m".to_string(),
            messages: vec![
                Message::text(Role::System, "be brief"),
                Message::text(Role::User, "hi"),
                Message::text(Role::System, "and kind"),
            ],
            ..UnifiedRequest::default()
        };
        req.hoist_system_messages();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.instructions.as_deref(), Some("be brief\nand kind"));
    }

    #[test]
    fn test_split_tool_results_keeps_order() {
        let msg = Message::parts(
            Role::User,
            vec![
                ContentPart::ToolResult {
                    tool_call_id: "toolu_1".to_string(),
                    content: "42".to_string(),
                    is_error: false,
                },
                ContentPart::ToolResult {
                    tool_call_id: "toolu_2".to_string(),
                    content: "boom".to_string(),
                    is_error: true,
                },
                ContentPart::Text {
                    text: "continue".to_string(),
                },
            ],
        );
        let split = msg.split_tool_results();
        assert_eq!(split.len(), 3);
        assert_eq!(split[0].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(split[1].content.text(), "ERROR: boom");
        assert_eq!(split[2].role, Role::User);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("developer"), Role::System);
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("whatever"), Role::User);
    }
}
