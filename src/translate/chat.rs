//! Chat-completion dialect ⇄ unified request.
//!
//! Chat is the hub dialect: every provider response is converted into a chat
//! completion (or chunk stream) before being re-encoded for the caller.

use super::bridge;
use super::chat_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatResponseFormat, ChatTool,
    ChatToolCall, ChatToolCallFunction, ContentPart as ChatPart, ImageUrlDetail, InputAudio,
    JsonSchemaSpec, StopSequences, StreamOptions, TypedContentPart,
};
use super::unified::{
    ContentPart, ImageDetail, McpTool, Message, MessageContent, ReasoningConfig, ResponseFormat,
    Role, ToolCall, ToolDefinition, UnifiedRequest, WebSearchTool, FunctionTool,
};
use super::Dialect;
use crate::error::{GatewayError, Result};
use serde_json::Value;

/// Parse a chat-completion request into the unified model.
pub fn request_to_unified(req: &ChatCompletionRequest) -> UnifiedRequest {
    let messages = req.messages.iter().map(message_to_unified).collect();

    let tools = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(tool_to_unified).collect())
        .unwrap_or_default();

    UnifiedRequest {
        model: req.model.clone(),
        messages,
        instructions: None,
        temperature: req.temperature,
        top_p: req.top_p,
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
        n: req.n,
        stop: req.stop.clone().map(StopSequences::into_vec).unwrap_or_default(),
        max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
        seed: req.seed,
        user: req.user.clone(),
        tools,
        tool_choice: req
            .tool_choice
            .as_ref()
            .and_then(bridge::normalize_tool_choice_value),
        parallel_tool_calls: req.parallel_tool_calls,
        response_format: req.response_format.as_ref().map(format_to_unified),
        reasoning: req.reasoning_effort.as_ref().map(|effort| ReasoningConfig {
            effort: Some(effort.clone()),
            summary: None,
        }),
        stream: req.stream.unwrap_or(false),
        prompt_template: None,
        background: false,
    }
}

fn message_to_unified(msg: &ChatMessage) -> Message {
    let content = match msg.content {
        Some(ChatContent::Text(ref t)) => MessageContent::Text(t.clone()),
        Some(ChatContent::Parts(ref parts)) => {
            MessageContent::Parts(parts.iter().map(part_to_unified).collect())
        }
        None => MessageContent::Text(String::new()),
    };

    let tool_calls = msg
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Message {
        role: Role::parse(&msg.role),
        content,
        name: msg.name.clone(),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn part_to_unified(part: &ChatPart) -> ContentPart {
    match part {
        ChatPart::Typed(TypedContentPart::Text { text }) => ContentPart::Text { text: text.clone() },
        ChatPart::Typed(TypedContentPart::ImageUrl { image_url }) => ContentPart::Image {
            url: image_url.url.clone(),
            detail: ImageDetail::parse(image_url.detail.as_deref()),
        },
        ChatPart::Typed(TypedContentPart::InputAudio { input_audio }) => ContentPart::Audio {
            data: input_audio.data.clone(),
            format: input_audio.format.clone(),
        },
        ChatPart::Typed(TypedContentPart::Reasoning {
            summary,
            encrypted_content,
        }) => ContentPart::Reasoning {
            summary: summary.clone(),
            encrypted: encrypted_content.clone(),
        },
        ChatPart::Unknown(v) => ContentPart::Unknown(v.clone()),
    }
}

fn tool_to_unified(tool: &ChatTool) -> ToolDefinition {
    match (tool.tool_type.as_str(), &tool.function) {
        ("function", Some(f)) => ToolDefinition::Function(FunctionTool {
            name: f.name.clone(),
            description: f.description.clone(),
            parameters: f.parameters.clone(),
            strict: f.strict,
        }),
        ("web_search" | "web_search_preview", _) => ToolDefinition::WebSearch(WebSearchTool {
            search_context_size: tool
                .extra
                .get("search_context_size")
                .and_then(Value::as_str)
                .map(String::from),
            allowed_domains: tool
                .extra
                .get("filters")
                .and_then(|f| f.get("allowed_domains"))
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default(),
            user_location: tool.extra.get("user_location").cloned(),
        }),
        ("mcp", _) => ToolDefinition::Mcp(McpTool {
            server_label: tool
                .extra
                .get("server_label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            server_url: tool
                .extra
                .get("server_url")
                .and_then(Value::as_str)
                .map(String::from),
            allowed_tools: tool
                .extra
                .get("allowed_tools")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default(),
            headers: tool.extra.get("headers").cloned(),
            require_approval: tool.extra.get("require_approval").cloned(),
        }),
        _ => ToolDefinition::Unknown(serde_json::to_value(tool).unwrap_or(Value::Null)),
    }
}

fn format_to_unified(format: &ChatResponseFormat) -> ResponseFormat {
    match format {
        ChatResponseFormat::Text => ResponseFormat::Text,
        ChatResponseFormat::JsonObject => ResponseFormat::JsonObject,
        ChatResponseFormat::JsonSchema { json_schema } => ResponseFormat::JsonSchema {
            name: json_schema.name.clone(),
            schema: json_schema.schema.clone(),
            strict: json_schema.strict,
            description: json_schema.description.clone(),
        },
    }
}

/// Render the unified request as a chat-completion request.
///
/// Fails with `UnsupportedFeature` for prompt templates and background mode.
/// Non-function tools are dropped since the dialect cannot express them.
pub fn unified_to_request(req: &UnifiedRequest) -> Result<ChatCompletionRequest> {
    if req.prompt_template.is_some() {
        return Err(GatewayError::unsupported("prompt templates", Dialect::Chat.as_str()));
    }
    if req.background {
        return Err(GatewayError::unsupported("background execution", Dialect::Chat.as_str()));
    }

    let reasoning_model = bridge::is_reasoning_model(&req.model);
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref instructions) = req.instructions {
        let role = if reasoning_model { "developer" } else { "system" };
        messages.push(ChatMessage::text(role, instructions.clone()));
    }

    for msg in req.messages.iter().cloned().flat_map(Message::split_tool_results) {
        messages.push(message_to_chat(&msg));
    }

    let tools: Vec<ChatTool> = req
        .tools
        .iter()
        .filter_map(|tool| match tool {
            ToolDefinition::Function(f) => Some(ChatTool::function(ChatFunction {
                name: f.name.clone(),
                description: f.description.clone(),
                parameters: f.parameters.clone(),
                strict: f.strict,
            })),
            other => {
                tracing::debug!(tool = ?other, "Dropping tool the chat dialect cannot express");
                None
            }
        })
        .collect();

    // A tool choice is meaningless once every tool it could address was dropped.
    let tool_choice = if tools.is_empty() {
        None
    } else {
        req.tool_choice
            .as_ref()
            .map(|c| bridge::normalize_tool_choice(c, Dialect::Chat))
    };

    let (max_tokens, max_completion_tokens) = if reasoning_model {
        (None, req.max_output_tokens)
    } else {
        (req.max_output_tokens, None)
    };

    Ok(ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens,
        max_completion_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
        n: req.n,
        seed: req.seed,
        stream: req.stream.then_some(true),
        stream_options: req.stream.then_some(StreamOptions {
            include_usage: true,
        }),
        parallel_tool_calls: if tools.is_empty() {
            None
        } else {
            req.parallel_tool_calls
        },
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
        response_format: req.response_format.as_ref().map(format_to_chat),
        reasoning_effort: req.reasoning.as_ref().and_then(|r| r.effort.clone()),
        stop: (!req.stop.is_empty()).then(|| StopSequences::Many(req.stop.clone())),
        user: req.user.clone(),
    })
}

fn message_to_chat(msg: &Message) -> ChatMessage {
    let content = match msg.content {
        MessageContent::Text(ref t) => {
            if t.is_empty() && !msg.tool_calls.is_empty() {
                None
            } else {
                Some(ChatContent::Text(t.clone()))
            }
        }
        MessageContent::Parts(ref parts) => {
            let parts: Vec<ChatPart> = parts
                .iter()
                .filter_map(bridge::summarize_reasoning)
                .filter_map(|p| part_to_chat(&p))
                .collect();
            collapse_parts(parts)
        }
    };

    let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
        msg.tool_calls
            .iter()
            .map(|tc| ChatToolCall {
                id: tc.id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                },
            })
            .collect()
    });

    ChatMessage {
        role: msg.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
        name: msg.name.clone(),
    }
}

fn part_to_chat(part: &ContentPart) -> Option<ChatPart> {
    match part {
        ContentPart::Text { text } => Some(ChatPart::text(text.clone())),
        ContentPart::Image { url, detail } => {
            Some(ChatPart::Typed(TypedContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: url.clone(),
                    detail: (*detail != ImageDetail::Auto).then(|| detail.as_str().to_string()),
                },
            }))
        }
        ContentPart::Audio { data, format } => Some(ChatPart::Typed(TypedContentPart::InputAudio {
            input_audio: InputAudio {
                data: data.clone(),
                format: format.clone(),
            },
        })),
        // Already lifted into tool messages or summarized by the caller.
        ContentPart::ToolResult { .. } | ContentPart::Reasoning { .. } => None,
        ContentPart::Unknown(v) => Some(ChatPart::Unknown(v.clone())),
    }
}

/// A lone text part collapses to plain string content.
fn collapse_parts(parts: Vec<ChatPart>) -> Option<ChatContent> {
    if parts.is_empty() {
        return None;
    }
    if let [ChatPart::Typed(TypedContentPart::Text { text })] = parts.as_slice() {
        return Some(ChatContent::Text(text.clone()));
    }
    Some(ChatContent::Parts(parts))
}

fn format_to_chat(format: &ResponseFormat) -> ChatResponseFormat {
    match format {
        ResponseFormat::Text => ChatResponseFormat::Text,
        ResponseFormat::JsonObject => ChatResponseFormat::JsonObject,
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
            description,
        } => ChatResponseFormat::JsonSchema {
            json_schema: JsonSchemaSpec {
                name: name.clone(),
                description: description.clone(),
                schema: schema.clone(),
                strict: *strict,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::unified::ToolChoice;
    use serde_json::json;

    fn parse(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_round_trip_preserves_tool_calls() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"}
            ],
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {"type": "object"}}}],
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        }));

        let unified = request_to_unified(&req);
        assert_eq!(unified.messages[1].tool_calls[0].arguments, "{\"city\":\"Paris\"}");
        assert_eq!(unified.tool_choice, Some(ToolChoice::Named("get_weather".to_string())));

        let back = unified_to_request(&unified).unwrap();
        assert_eq!(back.messages.len(), 3);
        let calls = back.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert!(back.messages[1].content.is_none());
        assert_eq!(back.messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            back.tool_choice,
            Some(json!({"type": "function", "function": {"name": "get_weather"}}))
        );
    }

    #[test]
    fn test_non_function_tools_are_dropped() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "web_search_preview", "search_context_size": "low"}],
            "tool_choice": "auto"
        }));
        let unified = request_to_unified(&req);
        assert!(matches!(unified.tools[0], ToolDefinition::WebSearch(_)));

        let back = unified_to_request(&unified).unwrap();
        assert!(back.tools.is_none());
        assert!(back.tool_choice.is_none());
    }

    #[test]
    fn test_prompt_template_is_unsupported() {
        let unified = UnifiedRequest {
            model: "gpt-4o".to_string(),
            prompt_template: Some(json!({"id": "pmpt_1"})),
            ..UnifiedRequest::default()
        };
        let err = unified_to_request(&unified).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedFeature);

        let unified = UnifiedRequest {
            model: "gpt-4o".to_string(),
            background: true,
            ..UnifiedRequest::default()
        };
        assert!(unified_to_request(&unified).is_err());
    }

    #[test]
    fn test_stream_forces_usage_reporting() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }));
        let back = unified_to_request(&request_to_unified(&req)).unwrap();
        assert!(back.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_reasoning_model_uses_completion_token_limit() {
        let unified = UnifiedRequest {
            model: "o3-mini".to_string(),
            instructions: Some("be terse".to_string()),
            max_output_tokens: Some(500),
            ..UnifiedRequest::default()
        };
        let req = unified_to_request(&unified).unwrap();
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.max_completion_tokens, Some(500));
        assert_eq!(req.messages[0].role, "developer");
    }

    #[test]
    fn test_image_detail_round_trip() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png", "detail": "low"}}
            ]}]
        }));
        let unified = request_to_unified(&req);
        let MessageContent::Parts(ref parts) = unified.messages[0].content else {
            panic!("expected parts");
        };
        assert_eq!(
            parts[1],
            ContentPart::Image {
                url: "https://x/y.png".to_string(),
                detail: ImageDetail::Low
            }
        );
    }
}
