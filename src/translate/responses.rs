//! Structured-response dialect ⇄ unified request, and the response-document
//! conversions between it and the chat and message dialects.

use std::collections::HashSet;

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage as ClaudeUsage};
use super::bridge;
use super::chat_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};
use super::responses_types::{
    AudioPayload, IncompleteDetails, InputContentPart, InputItem, InputMessage,
    InputMessageContent, OutputContent, OutputItem, ReasoningParam, ResponsesInput,
    ResponsesRequest, ResponsesResponse, ResponsesTool, ResponsesUsage, SummaryText, TextFormat,
    TextParam, TypedInputContent, TypedInputItem, TypedOutputContent, TypedOutputItem,
    TypedResponsesTool, WebSearchFilters, WebSearchSpec,
};
use super::unified::{
    ContentPart, FunctionTool, ImageDetail, McpTool, Message, MessageContent, ReasoningConfig,
    ResponseFormat, Role, ToolCall, ToolDefinition, UnifiedRequest, WebSearchTool,
};
use super::{new_id, unix_now, Dialect};
use crate::usage::SearchMeter;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Unified -> structured-response request
// ---------------------------------------------------------------------------

/// A tool round trip the target cannot carry as function-call items, because
/// the called function is not among the declared tools.
struct UndeclaredCall {
    id: String,
    name: String,
    arguments: String,
    result: Option<String>,
}

/// Render the unified request as a structured-response request.
///
/// System messages are hoisted into `instructions`. Calls to declared functions
/// become `function_call`/`function_call_output` items; history of undeclared
/// calls is summarized into a synthetic assistant message.
pub fn unified_to_request(req: &UnifiedRequest) -> ResponsesRequest {
    let mut req = req.clone();
    req.hoist_system_messages();

    let declared: HashSet<String> = req
        .function_tool_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut items: Vec<InputItem> = Vec::new();
    let mut undeclared: Vec<UndeclaredCall> = Vec::new();

    for msg in req.messages.iter().cloned().flat_map(Message::split_tool_results) {
        if msg.role == Role::Tool {
            let call_id = msg.tool_call_id.clone().unwrap_or_default();
            let output = msg.content.text();
            if let Some(pending) = undeclared.iter_mut().find(|c| c.id == call_id) {
                pending.result = Some(output);
            } else {
                items.push(InputItem::Typed(TypedInputItem::FunctionCallOutput {
                    call_id,
                    output: Value::String(output),
                }));
            }
            continue;
        }

        flush_undeclared(&mut undeclared, &mut items);

        let parts = message_parts(&msg);
        if !parts.is_empty() {
            let role = match msg.role {
                Role::Assistant => "assistant",
                Role::System => "developer",
                Role::User | Role::Tool => "user",
            };
            items.push(InputItem::Message(InputMessage::new(role, parts)));
        }

        for call in &msg.tool_calls {
            if declared.contains(&call.name) {
                items.push(InputItem::Typed(TypedInputItem::FunctionCall {
                    id: None,
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }));
            } else {
                undeclared.push(UndeclaredCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: None,
                });
            }
        }
    }
    flush_undeclared(&mut undeclared, &mut items);

    let tools: Vec<ResponsesTool> = req.tools.iter().map(tool_to_responses).collect();

    ResponsesRequest {
        model: req.model.clone(),
        input: ResponsesInput::Items(items),
        instructions: req.instructions.clone(),
        max_output_tokens: req.max_output_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        tool_choice: if tools.is_empty() {
            None
        } else {
            req.tool_choice
                .as_ref()
                .map(|c| bridge::normalize_tool_choice(c, Dialect::Responses))
        },
        tools: (!tools.is_empty()).then_some(tools),
        parallel_tool_calls: req.parallel_tool_calls,
        reasoning: req.reasoning.as_ref().map(|r| ReasoningParam {
            effort: r.effort.clone(),
            summary: r.summary.clone(),
        }),
        text: req.response_format.as_ref().map(|f| TextParam {
            format: Some(format_to_responses(f)),
        }),
        stream: req.stream.then_some(true),
        store: None,
        user: req.user.clone(),
        prompt: req.prompt_template.clone(),
        background: req.background.then_some(true),
        previous_response_id: None,
        extra: serde_json::Map::new(),
    }
}

/// Emit one synthetic assistant message describing every pending undeclared call.
fn flush_undeclared(pending: &mut Vec<UndeclaredCall>, items: &mut Vec<InputItem>) {
    if pending.is_empty() {
        return;
    }
    let summary = pending
        .drain(..)
        .map(|c| match c.result {
            Some(result) => format!("Called {}({}) → {}", c.name, c.arguments, result),
            None => format!("Called {}({})", c.name, c.arguments),
        })
        .collect::<Vec<_>>()
        .join("\n");
    items.push(InputItem::Message(InputMessage::new(
        "assistant",
        vec![InputContentPart::output_text(summary)],
    )));
}

fn message_parts(msg: &Message) -> Vec<InputContentPart> {
    let assistant = msg.role == Role::Assistant;
    let text_part = |text: String| {
        if assistant {
            InputContentPart::output_text(text)
        } else {
            InputContentPart::input_text(text)
        }
    };

    match msg.content {
        MessageContent::Text(ref t) if t.is_empty() => Vec::new(),
        MessageContent::Text(ref t) => vec![text_part(t.clone())],
        MessageContent::Parts(ref parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text_part(text.clone())),
                ContentPart::Image { url, detail } => Some(InputContentPart::Typed(
                    TypedInputContent::InputImage {
                        image_url: Some(url.clone()),
                        file_id: None,
                        detail: detail.as_str().to_string(),
                    },
                )),
                ContentPart::Audio { data, format } => Some(InputContentPart::Typed(
                    TypedInputContent::InputAudio {
                        input_audio: AudioPayload {
                            data: data.clone(),
                            format: format.clone(),
                        },
                    },
                )),
                ContentPart::Reasoning { .. } => match bridge::summarize_reasoning(part) {
                    Some(ContentPart::Text { text }) => Some(InputContentPart::output_text(text)),
                    _ => None,
                },
                ContentPart::ToolResult { .. } => None,
                ContentPart::Unknown(v) => Some(InputContentPart::Unknown(v.clone())),
            })
            .collect(),
    }
}

fn tool_to_responses(tool: &ToolDefinition) -> ResponsesTool {
    match tool {
        ToolDefinition::Function(f) => ResponsesTool::Typed(TypedResponsesTool::Function {
            name: f.name.clone(),
            description: f.description.clone(),
            parameters: f.parameters.clone(),
            strict: f.strict,
        }),
        ToolDefinition::WebSearch(ws) => {
            ResponsesTool::Typed(TypedResponsesTool::WebSearch(WebSearchSpec {
                search_context_size: ws.search_context_size.clone(),
                filters: (!ws.allowed_domains.is_empty()).then(|| WebSearchFilters {
                    allowed_domains: ws.allowed_domains.clone(),
                }),
                user_location: ws.user_location.clone(),
            }))
        }
        ToolDefinition::Mcp(mcp) => ResponsesTool::Typed(TypedResponsesTool::Mcp {
            server_label: mcp.server_label.clone(),
            server_url: mcp.server_url.clone(),
            allowed_tools: (!mcp.allowed_tools.is_empty())
                .then(|| Value::from(mcp.allowed_tools.clone())),
            headers: mcp.headers.clone(),
            require_approval: mcp.require_approval.clone(),
        }),
        ToolDefinition::Unknown(v) => ResponsesTool::Unknown(v.clone()),
    }
}

fn format_to_responses(format: &ResponseFormat) -> TextFormat {
    match format {
        ResponseFormat::Text => TextFormat::Text,
        ResponseFormat::JsonObject => TextFormat::JsonObject,
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
            description,
        } => TextFormat::JsonSchema {
            name: name.clone(),
            schema: schema.clone(),
            description: description.clone(),
            strict: *strict,
        },
    }
}

// ---------------------------------------------------------------------------
// Structured-response request -> unified
// ---------------------------------------------------------------------------

/// Parse a structured-response request into the unified model.
///
/// Consecutive `function_call` items join the preceding assistant turn so the
/// chat dialect sees them as one batch of parallel calls.
pub fn request_to_unified(req: &ResponsesRequest) -> UnifiedRequest {
    let mut messages: Vec<Message> = Vec::new();

    match req.input {
        ResponsesInput::Text(ref text) => messages.push(Message::text(Role::User, text.clone())),
        ResponsesInput::Items(ref items) => {
            for item in items {
                match item {
                    InputItem::Message(m) => messages.push(input_message_to_unified(m)),
                    InputItem::Typed(TypedInputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                        ..
                    }) => {
                        let call = ToolCall {
                            id: call_id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        };
                        match messages.last_mut() {
                            Some(last) if last.role == Role::Assistant => last.tool_calls.push(call),
                            _ => {
                                let mut msg = Message::text(Role::Assistant, String::new());
                                msg.tool_calls.push(call);
                                messages.push(msg);
                            }
                        }
                    }
                    InputItem::Typed(TypedInputItem::FunctionCallOutput { call_id, output }) => {
                        messages.push(Message::tool_result(call_id.clone(), output_text(output)));
                    }
                    InputItem::Typed(TypedInputItem::Reasoning {
                        summary,
                        encrypted_content,
                        ..
                    }) => {
                        let summary = summary
                            .iter()
                            .map(|s| s.text.as_str())
                            .collect::<Vec<_>>()
                            .join("\n");
                        messages.push(Message::parts(
                            Role::Assistant,
                            vec![ContentPart::Reasoning {
                                summary: (!summary.is_empty()).then_some(summary),
                                encrypted: encrypted_content.clone(),
                            }],
                        ));
                    }
                    InputItem::Unknown(v) => {
                        let item_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                        tracing::warn!(
                            item_type,
                            "Skipping input item with no unified equivalent"
                        );
                    }
                }
            }
        }
    }

    let tools = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(tool_to_unified).collect())
        .unwrap_or_default();

    UnifiedRequest {
        model: req.model.clone(),
        messages,
        instructions: req.instructions.clone(),
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_output_tokens,
        user: req.user.clone(),
        tools,
        tool_choice: req
            .tool_choice
            .as_ref()
            .and_then(bridge::normalize_tool_choice_value),
        parallel_tool_calls: req.parallel_tool_calls,
        response_format: req
            .text
            .as_ref()
            .and_then(|t| t.format.as_ref())
            .map(format_to_unified),
        reasoning: req.reasoning.as_ref().map(|r| ReasoningConfig {
            effort: r.effort.clone(),
            summary: r.summary.clone(),
        }),
        stream: req.stream.unwrap_or(false),
        prompt_template: req.prompt.clone(),
        background: req.background.unwrap_or(false),
        ..UnifiedRequest::default()
    }
}

fn input_message_to_unified(msg: &InputMessage) -> Message {
    let content = match msg.content {
        InputMessageContent::Text(ref t) => MessageContent::Text(t.clone()),
        InputMessageContent::Parts(ref parts) => MessageContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    InputContentPart::Typed(TypedInputContent::InputText { text })
                    | InputContentPart::Typed(TypedInputContent::OutputText { text, .. }) => {
                        ContentPart::Text { text: text.clone() }
                    }
                    InputContentPart::Typed(TypedInputContent::Refusal { refusal }) => {
                        ContentPart::Text {
                            text: refusal.clone(),
                        }
                    }
                    InputContentPart::Typed(TypedInputContent::InputImage {
                        image_url: Some(url),
                        detail,
                        ..
                    }) => ContentPart::Image {
                        url: url.clone(),
                        detail: ImageDetail::parse(Some(detail.as_str())),
                    },
                    InputContentPart::Typed(TypedInputContent::InputAudio { input_audio }) => {
                        ContentPart::Audio {
                            data: input_audio.data.clone(),
                            format: input_audio.format.clone(),
                        }
                    }
                    other => ContentPart::Unknown(serde_json::to_value(other).unwrap_or(Value::Null)),
                })
                .collect(),
        ),
    };
    Message {
        role: Role::parse(&msg.role),
        content,
        name: None,
        tool_calls: Vec::new(),
        tool_call_id: None,
    }
}

/// Function outputs are a string or a list of content parts.
fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

fn tool_to_unified(tool: &ResponsesTool) -> ToolDefinition {
    match tool {
        ResponsesTool::Typed(TypedResponsesTool::Function {
            name,
            description,
            parameters,
            strict,
        }) => ToolDefinition::Function(FunctionTool {
            name: name.clone(),
            description: description.clone(),
            parameters: parameters.clone(),
            strict: *strict,
        }),
        ResponsesTool::Typed(
            TypedResponsesTool::WebSearch(spec) | TypedResponsesTool::WebSearchPreview(spec),
        ) => ToolDefinition::WebSearch(WebSearchTool {
            search_context_size: spec.search_context_size.clone(),
            allowed_domains: spec
                .filters
                .as_ref()
                .map(|f| f.allowed_domains.clone())
                .unwrap_or_default(),
            user_location: spec.user_location.clone(),
        }),
        ResponsesTool::Typed(TypedResponsesTool::Mcp {
            server_label,
            server_url,
            allowed_tools,
            headers,
            require_approval,
        }) => ToolDefinition::Mcp(McpTool {
            server_label: server_label.clone(),
            server_url: server_url.clone(),
            allowed_tools: allowed_tools.as_ref().map(mcp_tool_names).unwrap_or_default(),
            headers: headers.clone(),
            require_approval: require_approval.clone(),
        }),
        ResponsesTool::Unknown(v) => ToolDefinition::Unknown(v.clone()),
    }
}

/// `allowed_tools` is either a name list or `{tool_names: [...]}`.
fn mcp_tool_names(value: &Value) -> Vec<String> {
    let list = value.get("tool_names").unwrap_or(value);
    list.as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn format_to_unified(format: &TextFormat) -> ResponseFormat {
    match format {
        TextFormat::Text => ResponseFormat::Text,
        TextFormat::JsonObject => ResponseFormat::JsonObject,
        TextFormat::JsonSchema {
            name,
            schema,
            description,
            strict,
        } => ResponseFormat::JsonSchema {
            name: name.clone(),
            schema: schema.clone(),
            strict: *strict,
            description: description.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Response documents
// ---------------------------------------------------------------------------

/// Map a terminal response status to a chat finish reason.
pub fn finish_reason(status: Option<&str>, saw_tool_calls: bool) -> &'static str {
    if saw_tool_calls {
        return "tool_calls";
    }
    match status {
        Some("incomplete") => "length",
        _ => "stop",
    }
}

/// Charge-relevant description of a web search call, if `item` is one.
/// Returns true when the meter had not seen the call before.
pub fn record_web_search(item: &OutputItem, meter: &mut SearchMeter) -> bool {
    match item {
        OutputItem::Typed(TypedOutputItem::WebSearchCall { id, action, .. }) => {
            let query = action.as_ref().and_then(|a| a.query.as_deref());
            let domains = action.as_ref().map(|a| a.domains.as_slice()).unwrap_or(&[]);
            meter.record(Some(id.as_str()), query, domains)
        }
        _ => false,
    }
}

/// Text, reasoning and tool calls gathered from a response's output items.
#[derive(Debug, Default)]
pub(crate) struct OutputSummary {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ChatToolCall>,
}

impl OutputSummary {
    /// Everything the model generated, for completion-token estimates.
    pub fn completion_text(&self) -> String {
        let mut text = String::with_capacity(self.text.len() + self.reasoning.len());
        text.push_str(&self.reasoning);
        text.push_str(&self.text);
        for call in &self.tool_calls {
            text.push_str(&call.function.name);
            text.push_str(&call.function.arguments);
        }
        text
    }
}

pub(crate) fn summarize_output(output: &[OutputItem]) -> OutputSummary {
    let mut summary = OutputSummary::default();
    for item in output {
        match item {
            OutputItem::Typed(TypedOutputItem::Message { content, .. }) => {
                for part in content {
                    match part {
                        OutputContent::Typed(TypedOutputContent::OutputText { text, .. }) => {
                            summary.text.push_str(text);
                        }
                        OutputContent::Typed(TypedOutputContent::Refusal { refusal }) => {
                            summary.text.push_str(refusal);
                        }
                        OutputContent::Unknown(_) => {}
                    }
                }
            }
            OutputItem::Typed(TypedOutputItem::Reasoning { summary: parts, .. }) => {
                for part in parts {
                    if !summary.reasoning.is_empty() {
                        summary.reasoning.push('\n');
                    }
                    summary.reasoning.push_str(&part.text);
                }
            }
            OutputItem::Typed(TypedOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            }) => summary.tool_calls.push(ChatToolCall {
                id: call_id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            _ => {}
        }
    }
    summary
}

/// Convert a structured-response document into a chat completion.
pub fn response_to_chat(resp: &ResponsesResponse) -> ChatCompletionResponse {
    let summary = summarize_output(&resp.output);
    let finish = finish_reason(resp.status.as_deref(), !summary.tool_calls.is_empty());

    ChatCompletionResponse {
        id: resp.id.clone(),
        object: "chat.completion".to_string(),
        created: resp.created_at,
        model: resp.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: (!summary.text.is_empty() || summary.tool_calls.is_empty())
                    .then_some(summary.text),
                reasoning_content: (!summary.reasoning.is_empty()).then_some(summary.reasoning),
                tool_calls: (!summary.tool_calls.is_empty()).then_some(summary.tool_calls),
            },
            finish_reason: Some(finish.to_string()),
        }],
        usage: resp
            .usage
            .as_ref()
            .map(|u| ChatUsage::from_record(&u.to_record())),
    }
}

/// Convert a chat completion into a structured-response document (downgrade path).
pub fn chat_to_response(resp: &ChatCompletionResponse, model: &str) -> ResponsesResponse {
    let mut output = Vec::new();
    let choice = resp.choices.first();

    if let Some(c) = choice {
        if let Some(reasoning) = c.message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            output.push(OutputItem::Typed(TypedOutputItem::Reasoning {
                id: new_id("rs_"),
                summary: vec![SummaryText::new(reasoning.clone())],
                encrypted_content: None,
            }));
        }
        if let Some(text) = c.message.content.as_ref().filter(|t| !t.is_empty()) {
            output.push(OutputItem::Typed(TypedOutputItem::Message {
                id: new_id("msg_"),
                role: "assistant".to_string(),
                content: vec![OutputContent::text(text.clone())],
                status: Some("completed".to_string()),
            }));
        }
        for tc in c.message.tool_calls.iter().flatten() {
            output.push(OutputItem::Typed(TypedOutputItem::FunctionCall {
                id: new_id("fc_"),
                call_id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
                status: Some("completed".to_string()),
            }));
        }
    }

    let truncated = choice.and_then(|c| c.finish_reason.as_deref()) == Some("length");
    ResponsesResponse {
        id: format!("resp_{}", resp.id.trim_start_matches("chatcmpl-")),
        object: "response".to_string(),
        created_at: if resp.created > 0 { resp.created } else { unix_now() },
        model: model.to_string(),
        status: Some(if truncated { "incomplete" } else { "completed" }.to_string()),
        output,
        usage: resp
            .usage
            .as_ref()
            .map(|u| ResponsesUsage::from_record(&u.to_record())),
        incomplete_details: truncated.then(|| IncompleteDetails {
            reason: "max_output_tokens".to_string(),
        }),
        error: None,
    }
}

/// Convert a structured-response document into a message-dialect response.
pub fn response_to_claude(resp: &ResponsesResponse, model: &str) -> MessagesResponse {
    let mut content = Vec::new();
    let mut saw_tool_use = false;

    for item in &resp.output {
        match item {
            OutputItem::Typed(TypedOutputItem::Reasoning {
                summary,
                encrypted_content,
                ..
            }) => {
                let thinking = summary
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !thinking.is_empty() {
                    content.push(ResponseContentBlock::Thinking {
                        thinking,
                        signature: encrypted_content.clone().unwrap_or_default(),
                    });
                }
            }
            OutputItem::Typed(TypedOutputItem::Message { content: parts, .. }) => {
                for part in parts {
                    if let OutputContent::Typed(TypedOutputContent::OutputText { text, .. }) = part
                    {
                        content.push(ResponseContentBlock::Text { text: text.clone() });
                    }
                }
            }
            OutputItem::Typed(TypedOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            }) => {
                saw_tool_use = true;
                content.push(ResponseContentBlock::ToolUse {
                    id: call_id.clone(),
                    name: name.clone(),
                    input: serde_json::from_str(arguments)
                        .unwrap_or_else(|_| Value::Object(serde_json::Map::new())),
                });
            }
            _ => {}
        }
    }

    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = if saw_tool_use {
        "tool_use"
    } else if resp.status.as_deref() == Some("incomplete") {
        "max_tokens"
    } else {
        "end_turn"
    };

    let usage = resp.usage.as_ref().map_or_else(ClaudeUsage::default, |u| ClaudeUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u
            .input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|c| *c > 0),
    });

    MessagesResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("resp_")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::chat;
    use crate::translate::chat_types::ChatCompletionRequest;
    use serde_json::json;

    fn chat_request(value: Value) -> UnifiedRequest {
        let req: ChatCompletionRequest = serde_json::from_value(value).unwrap();
        chat::request_to_unified(&req)
    }

    fn items(req: &ResponsesRequest) -> &[InputItem] {
        match req.input {
            ResponsesInput::Items(ref items) => items,
            ResponsesInput::Text(_) => panic!("expected items"),
        }
    }

    #[test]
    fn test_system_message_hoisted_into_instructions() {
        let unified = chat_request(json!({
            "model": "gpt-4.1",
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        }));
        let req = unified_to_request(&unified);
        assert_eq!(req.instructions.as_deref(), Some("You are terse."));
        assert_eq!(items(&req).len(), unified.messages.len() - 1);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(json["input"][1]["content"][0]["type"], "output_text");
    }

    #[test]
    fn test_image_detail_hoisted() {
        let unified = chat_request(json!({
            "model": "gpt-4.1",
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "https://x/cat.png", "detail": "high"}}
            ]}]
        }));
        let json = serde_json::to_value(unified_to_request(&unified)).unwrap();
        let part = &json["input"][0]["content"][0];
        assert_eq!(part["type"], "input_image");
        assert_eq!(part["image_url"], "https://x/cat.png");
        assert_eq!(part["detail"], "high");
    }

    #[test]
    fn test_declared_tool_round_trip_preserves_call() {
        let unified = chat_request(json!({
            "model": "gpt-4.1",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_7", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_7", "content": "cold"}
            ],
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {}}}]
        }));

        let responses_req = unified_to_request(&unified);
        let back = request_to_unified(&responses_req);

        let call = &back.messages[1].tool_calls[0];
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, "{\"city\":\"Oslo\"}");
        assert_eq!(call.id, "call_7");
        assert_eq!(back.messages[2].tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn test_undeclared_tool_history_is_summarized() {
        let unified = chat_request(json!({
            "model": "gpt-4.1",
            "messages": [
                {"role": "user", "content": "what time is it"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "clock", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "12:00"},
                {"role": "user", "content": "thanks"}
            ]
        }));
        let req = unified_to_request(&unified);
        let json = serde_json::to_value(&req).unwrap();
        let input = json["input"].as_array().unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input[1]["role"], "assistant");
        assert_eq!(input[1]["content"][0]["text"], "Called clock({}) → 12:00");
        assert_eq!(input[2]["content"][0]["text"], "thanks");
    }

    #[test]
    fn test_reasoning_without_summary_is_dropped() {
        let req: ResponsesRequest = serde_json::from_value(json!({
            "model": "o3",
            "input": [
                {"role": "user", "content": "hi"},
                {"type": "reasoning", "summary": [], "encrypted_content": "gAAAA"},
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "pondered"}]}
            ]
        }))
        .unwrap();
        let unified = request_to_unified(&req);
        let back = unified_to_request(&unified);
        let json = serde_json::to_value(&back).unwrap();
        let input = json["input"].as_array().unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[1]["content"][0]["type"], "output_text");
        assert_eq!(input[1]["content"][0]["text"], "pondered");
    }

    #[test]
    fn test_response_to_chat_maps_tools_and_status() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_1", "created_at": 10, "model": "gpt-4.1", "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "hmm"}]},
                {"type": "function_call", "id": "fc_1", "call_id": "call_1",
                 "name": "lookup", "arguments": "{\"q\":1}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }))
        .unwrap();
        let chat = response_to_chat(&resp);
        let choice = &chat.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].id, "call_1");
        assert_eq!(chat.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn test_chat_to_response_incomplete() {
        let chat: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-9", "created": 5, "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "partial"},
                         "finish_reason": "length"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 7, "total_tokens": 10}
        }))
        .unwrap();
        let resp = chat_to_response(&chat, "gpt-4o");
        assert_eq!(resp.id, "resp_9");
        assert_eq!(resp.status.as_deref(), Some("incomplete"));
        assert_eq!(resp.usage.unwrap().total_tokens, 10);
    }

    #[test]
    fn test_response_to_claude_blocks() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_2", "model": "o3", "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "thinking"}]},
                {"type": "message", "id": "msg_1", "role": "assistant",
                 "content": [{"type": "output_text", "text": "answer"}]}
            ],
            "usage": {"input_tokens": 8, "output_tokens": 2, "total_tokens": 10}
        }))
        .unwrap();
        let claude = response_to_claude(&resp, "claude-sonnet-4");
        assert!(matches!(claude.content[0], ResponseContentBlock::Thinking { .. }));
        assert!(matches!(claude.content[1], ResponseContentBlock::Text { .. }));
        assert_eq!(claude.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(claude.usage.input_tokens, 8);
        assert_eq!(claude.usage.output_tokens, 2);
    }

    #[test]
    fn test_web_search_dedup_in_output() {
        let item: OutputItem = serde_json::from_value(json!({
            "type": "web_search_call", "id": "ws_1", "status": "completed",
            "action": {"query": "rust"}
        }))
        .unwrap();
        let mut meter = SearchMeter::new();
        assert!(record_web_search(&item, &mut meter));
        assert!(!record_web_search(&item, &mut meter));
        assert_eq!(meter.calls(), 1);
    }
}
