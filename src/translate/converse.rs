//! Converse dialect adaptor for externally hosted model families.
//!
//! Request conversion merges consecutive user and tool turns into one user
//! message, since the dialect requires strictly alternating roles.

use super::chat_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};
use super::converse_types::{
    ConverseContentBlock, ConverseMessage, ConverseRequest, ConverseResponse, ConverseTool,
    ConverseToolChoice, EmptyObject, ImageBlock, ImageBytes, InferenceConfig, InputSchema,
    NamedTool, ReasoningContentBlock, ReasoningText, ResponseBlock, SystemBlock, ToolConfig,
    ToolResultBlock, ToolResultContent, ToolSpec, ToolUseBlock,
};
use super::unified::{ContentPart, Message, MessageContent, Role, ToolChoice, ToolDefinition, UnifiedRequest};
use super::{new_id, unix_now, Dialect};
use crate::error::{GatewayError, Result};
use serde_json::Value;

/// Render the unified request as a converse request.
///
/// Images must already be inline `data:` URLs; audio has no converse equivalent.
pub fn unified_to_request(req: &UnifiedRequest) -> Result<ConverseRequest> {
    let target = Dialect::Converse.as_str();
    if req.prompt_template.is_some() {
        return Err(GatewayError::unsupported("prompt templates", target));
    }
    if req.background {
        return Err(GatewayError::unsupported("background execution", target));
    }

    let mut system: Vec<SystemBlock> = req
        .instructions
        .iter()
        .map(|text| SystemBlock { text: text.clone() })
        .collect();
    let mut messages: Vec<ConverseMessage> = Vec::new();

    for msg in req.messages.iter().cloned().flat_map(Message::split_tool_results) {
        if msg.role == Role::System {
            let text = msg.content.text();
            if !text.is_empty() {
                system.push(SystemBlock { text });
            }
            continue;
        }

        let role = if msg.role == Role::Assistant { "assistant" } else { "user" };
        let blocks = message_blocks(&msg)?;
        if blocks.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(ConverseMessage {
                role: role.to_string(),
                content: blocks,
            }),
        }
    }

    let inference = InferenceConfig {
        max_tokens: req.max_output_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.clone(),
    };

    let tools: Vec<ConverseTool> = req
        .tools
        .iter()
        .filter_map(|tool| match tool {
            ToolDefinition::Function(f) => Some(ConverseTool {
                tool_spec: ToolSpec {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    input_schema: InputSchema {
                        json: if f.parameters.is_null() {
                            serde_json::json!({"type": "object", "properties": {}})
                        } else {
                            f.parameters.clone()
                        },
                    },
                },
            }),
            other => {
                tracing::debug!(tool = ?other, "Dropping tool the converse dialect cannot express");
                None
            }
        })
        .collect();

    // The converse API has no "none" choice, so the tools are withheld instead.
    // A history with tool blocks still needs them declared.
    let history_uses_tools = messages.iter().flat_map(|m| &m.content).any(|b| {
        matches!(b, ConverseContentBlock::ToolUse(_) | ConverseContentBlock::ToolResult(_))
    });
    let withhold_tools = matches!(req.tool_choice, Some(ToolChoice::None)) && !history_uses_tools;

    let tool_config = (!tools.is_empty() && !withhold_tools).then(|| ToolConfig {
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(|choice| match choice {
            ToolChoice::Auto | ToolChoice::Mode(_) => Some(ConverseToolChoice::Auto(EmptyObject {})),
            ToolChoice::Required => Some(ConverseToolChoice::Any(EmptyObject {})),
            ToolChoice::Named(name) => Some(ConverseToolChoice::Tool(NamedTool { name: name.clone() })),
            ToolChoice::None => None,
        }),
    });

    Ok(ConverseRequest {
        messages,
        system,
        inference_config: (!inference.is_empty()).then_some(inference),
        tool_config,
        additional_model_request_fields: None,
    })
}

fn message_blocks(msg: &Message) -> Result<Vec<ConverseContentBlock>> {
    if msg.role == Role::Tool {
        return Ok(vec![ConverseContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
            content: vec![ToolResultContent::Text(msg.content.text())],
            status: None,
        })]);
    }

    let mut blocks = Vec::new();
    let parts = match msg.content {
        MessageContent::Text(ref t) => vec![ContentPart::Text { text: t.clone() }],
        MessageContent::Parts(ref p) => p.clone(),
    };

    for part in parts {
        match part {
            ContentPart::Text { text } => {
                if !text.trim().is_empty() {
                    blocks.push(ConverseContentBlock::Text(text));
                }
            }
            ContentPart::Image { url, .. } => blocks.push(ConverseContentBlock::Image(image_block(&url)?)),
            ContentPart::Audio { .. } => {
                return Err(GatewayError::unsupported("audio input", Dialect::Converse.as_str()));
            }
            ContentPart::Reasoning { summary, encrypted } => {
                if let (Role::Assistant, Some(text)) = (msg.role, summary) {
                    blocks.push(ConverseContentBlock::ReasoningContent(ReasoningContentBlock {
                        reasoning_text: Some(ReasoningText {
                            text,
                            signature: encrypted,
                        }),
                        redacted_content: None,
                    }));
                }
            }
            ContentPart::ToolResult { .. } => {}
            ContentPart::Unknown(v) => {
                let part_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                tracing::debug!(
                    part_type,
                    "Dropping content part the converse dialect cannot express"
                );
            }
        }
    }

    for call in &msg.tool_calls {
        let input = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        blocks.push(ConverseContentBlock::ToolUse(ToolUseBlock {
            tool_use_id: call.id.clone(),
            name: call.name.clone(),
            input,
        }));
    }

    Ok(blocks)
}

/// Split an inline `data:image/png;base64,...` URL into a converse image block.
fn image_block(url: &str) -> Result<ImageBlock> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        GatewayError::conversion("converse image", "remote image was not inlined before conversion")
    })?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| GatewayError::conversion("converse image", "malformed data URL"))?;
    let media_type = meta.trim_end_matches(";base64");
    let format = match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpeg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => {
            return Err(GatewayError::conversion(
                "converse image",
                format!("unsupported image type {other}"),
            ))
        }
    };
    Ok(ImageBlock {
        format: format.to_string(),
        source: ImageBytes {
            bytes: data.to_string(),
        },
    })
}

/// Map a converse stop reason onto the chat finish-reason vocabulary.
/// Unrecognised reasons pass through unchanged.
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "content_filtered" => "content_filter",
        other => other,
    }
    .to_string()
}

/// Convert a converse response into a chat completion.
pub fn response_to_chat(resp: &ConverseResponse, model: &str) -> ChatCompletionResponse {
    let mut text: Option<String> = None;
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &resp.output.message.content {
        match block {
            ResponseBlock::Known(ConverseContentBlock::Text(t)) => {
                if text.is_none() {
                    text = Some(t.clone());
                }
            }
            ResponseBlock::Known(ConverseContentBlock::ToolUse(tu)) => {
                tool_calls.push(ChatToolCall {
                    id: tu.tool_use_id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: tu.name.clone(),
                        arguments: serde_json::to_string(&tu.input).unwrap_or_default(),
                    },
                });
            }
            ResponseBlock::Known(ConverseContentBlock::ReasoningContent(rc)) => {
                if let Some(ref rt) = rc.reasoning_text {
                    reasoning.push_str(&rt.text);
                }
            }
            ResponseBlock::Known(_) | ResponseBlock::Unknown(_) => {}
        }
    }

    let mut finish = map_stop_reason(&resp.stop_reason);
    if !tool_calls.is_empty() {
        finish = "tool_calls".to_string();
    }

    ChatCompletionResponse {
        id: new_id("chatcmpl-"),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: text.or_else(|| tool_calls.is_empty().then(String::new)),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish),
        }],
        usage: resp
            .usage
            .as_ref()
            .map(|u| ChatUsage::from_record(&u.to_record())),
    }
}
