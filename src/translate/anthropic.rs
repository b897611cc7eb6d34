//! Message dialect ⇄ unified request, and chat completions back to message responses.
//!
//! System content collapses into one leading system message. Tool results stay
//! embedded in the user turn as `tool_result` parts; converters for dialects
//! that need standalone tool messages split them out.

use super::anthropic_types::{
    ContentBlock, ErrorResponse, ImageSource, MessagesRequest, MessagesResponse,
    ResponseContentBlock, Role as ClaudeRole, Tool, ToolResultContent, TypedContentBlock, Usage,
};
use super::bridge;
use super::chat_types::{ChatCompletionResponse, ChatErrorResponse};
use super::unified::{
    ContentPart, FunctionTool, ImageDetail, Message, MessageContent, ReasoningConfig, Role,
    ToolCall, ToolDefinition, UnifiedRequest, WebSearchTool,
};
use serde_json::Value;

/// Parse a message-dialect request into the unified model.
/// Pure function: remote image sources must already be inlined by the caller.
pub fn request_to_unified(req: &MessagesRequest) -> UnifiedRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(Message::text(Role::System, text));
        }
    }

    for msg in &req.messages {
        messages.push(translate_message(msg.role == ClaudeRole::Assistant, &msg.content.blocks()));
    }

    let tools = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(translate_tool).collect())
        .unwrap_or_default();

    let thinking_enabled = req
        .thinking
        .as_ref()
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled");

    UnifiedRequest {
        model: req.model.clone(),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone().unwrap_or_default(),
        max_output_tokens: Some(req.max_tokens),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        tools,
        tool_choice: req
            .tool_choice
            .as_ref()
            .and_then(bridge::normalize_tool_choice_value),
        reasoning: thinking_enabled.then(|| ReasoningConfig {
            effort: None,
            summary: Some("auto".to_string()),
        }),
        stream: req.stream.unwrap_or(false),
        ..UnifiedRequest::default()
    }
}

fn translate_message(assistant: bool, blocks: &[ContentBlock]) -> Message {
    let mut parts: Vec<ContentPart> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Typed(TypedContentBlock::Text { text }) => {
                parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Typed(TypedContentBlock::Image { source }) => {
                let url = match source {
                    ImageSource::Base64 { media_type, data } => {
                        format!("data:{media_type};base64,{data}")
                    }
                    ImageSource::Url { url } => url.clone(),
                };
                parts.push(ContentPart::Image {
                    url,
                    detail: ImageDetail::Auto,
                });
            }
            ContentBlock::Typed(TypedContentBlock::ToolUse { id, name, input }) => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_default(),
                });
            }
            ContentBlock::Typed(TypedContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            }) => {
                parts.push(ContentPart::ToolResult {
                    tool_call_id: tool_use_id.clone(),
                    content: tool_result_to_string(content.as_ref()),
                    is_error: *is_error == Some(true),
                });
            }
            ContentBlock::Typed(TypedContentBlock::Thinking {
                thinking,
                signature,
            }) => {
                parts.push(ContentPart::Reasoning {
                    summary: Some(thinking.clone()),
                    encrypted: signature.clone(),
                });
            }
            ContentBlock::Typed(TypedContentBlock::RedactedThinking { data }) => {
                parts.push(ContentPart::Reasoning {
                    summary: None,
                    encrypted: Some(data.clone()),
                });
            }
            ContentBlock::Unknown(v) => parts.push(ContentPart::Unknown(v.clone())),
        }
    }

    let role = if assistant { Role::Assistant } else { Role::User };
    let content = match parts.as_slice() {
        [] => MessageContent::Text(String::new()),
        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Parts(parts),
    };

    Message {
        role,
        content,
        name: None,
        tool_calls,
        tool_call_id: None,
    }
}

fn tool_result_to_string(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Typed(TypedContentBlock::Text { text }) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => "(no content)".to_string(),
    }
}

fn translate_tool(tool: &Tool) -> ToolDefinition {
    if tool.is_client_tool() {
        return ToolDefinition::Function(FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
            strict: None,
        });
    }
    match tool.tool_type.as_deref() {
        Some(t) if t.starts_with("web_search") => ToolDefinition::WebSearch(WebSearchTool::default()),
        _ => ToolDefinition::Unknown(serde_json::to_value(tool).unwrap_or(Value::Null)),
    }
}

/// Translate a chat completion into a message-dialect response.
/// `original_model` is the model name the caller asked for.
pub fn chat_response_to_claude(resp: &ChatCompletionResponse, original_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref reasoning) = c.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ResponseContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: String::new(),
                });
            }
        }

        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                let input: Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    // Callers expect at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map_or("end_turn", map_finish_reason);

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| {
        let record = u.to_record();
        Usage {
            input_tokens: record.prompt_tokens,
            output_tokens: record.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: (record.cached_tokens > 0).then_some(record.cached_tokens),
        }
    });

    let id = format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"));

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Map a chat finish reason to a message-dialect stop reason.
pub fn map_finish_reason(reason: &str) -> &str {
    match reason {
        "stop" | "content_filter" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        other => other,
    }
}

/// Translate a chat-dialect error body into a message-dialect error body.
pub fn chat_error_to_claude(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        "authentication_error" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}
