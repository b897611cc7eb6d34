//! State machine turning structured-response stream events into chat chunks.
//!
//! Providers either stream `*.delta`/`*.done` pairs, or only send the finished
//! response snapshot, or mix both. [`ResponsesStreamReconstructor`] tracks what
//! has already been emitted per content slot and only ever emits the unseen
//! suffix, so every mix yields the same final text and finish reason.

use std::collections::{BTreeMap, HashMap};

use super::chat_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatUsage, ChunkChoice, ChunkDelta,
    ChunkToolCall, ChunkToolCallFunction,
};
use super::responses::{finish_reason, record_web_search};
use super::responses_types::{
    OutputContent, OutputItem, ResponsesResponse, ResponsesStreamEvent, TypedOutputContent,
    TypedOutputItem,
};
use super::unix_now;
use crate::error::{GatewayError, Result};
use crate::usage::{SearchMeter, UsageRecord};

#[derive(Debug)]
struct ToolBuffer {
    chat_index: u64,
    call_id: String,
    arguments: String,
}

/// Per-response state; one per response id, never reused across responses.
#[derive(Debug)]
struct StreamAccumulator {
    response_id: String,
    created: u64,
    /// Text emitted so far, keyed by (output index, content index).
    text: BTreeMap<(u32, u32), String>,
    reasoning: String,
    /// Argument buffers keyed by output index.
    tools: BTreeMap<u32, ToolBuffer>,
    item_outputs: HashMap<String, u32>,
    next_tool_index: u64,
    usage: UsageRecord,
    role_sent: bool,
}

impl StreamAccumulator {
    fn new(response_id: &str, created: u64) -> Self {
        Self {
            response_id: response_id.to_string(),
            created: if created > 0 { created } else { unix_now() },
            text: BTreeMap::new(),
            reasoning: String::new(),
            tools: BTreeMap::new(),
            item_outputs: HashMap::new(),
            next_tool_index: 0,
            usage: UsageRecord::default(),
            role_sent: false,
        }
    }
}

/// Converts one structured-response event stream into chat-completion chunks.
///
/// Usage:
///   let mut rec = ResponsesStreamReconstructor::new("gpt-4.1");
///   for event in events {
///       for chunk in rec.process_event(&event)? { /* send */ }
///   }
///   let (tail, usage) = rec.finish();
#[derive(Debug)]
pub struct ResponsesStreamReconstructor {
    model: String,
    acc: Option<StreamAccumulator>,
    meter: SearchMeter,
    finished: bool,
    usage_sent: bool,
    failure: Option<GatewayError>,
}

impl ResponsesStreamReconstructor {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            acc: None,
            meter: SearchMeter::new(),
            finished: false,
            usage_sent: false,
            failure: None,
        }
    }

    /// Parse one SSE `data:` payload and process it. Malformed payloads are
    /// logged and skipped so one bad event cannot abort the stream.
    pub fn process_data(&mut self, data: &str) -> Result<Vec<ChatCompletionChunk>> {
        match serde_json::from_str::<ResponsesStreamEvent>(data) {
            Ok(event) => self.process_event(&event),
            Err(e) => {
                let err = GatewayError::stream_parse(e.to_string());
                tracing::debug!(error = %err, "Skipping stream event");
                Ok(Vec::new())
            }
        }
    }

    /// Process one provider event, returning zero or more chat chunks.
    /// A provider `error` event ends the stream with an upstream error.
    pub fn process_event(&mut self, event: &ResponsesStreamEvent) -> Result<Vec<ChatCompletionChunk>> {
        if self.finished {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();

        match event {
            ResponsesStreamEvent::Created { response } | ResponsesStreamEvent::InProgress { response } => {
                self.ensure_response(&response.id, response.created_at);
            }
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                self.ensure_response("", 0);
                self.observe_item(*output_index, item, &mut out);
            }
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                self.ensure_response("", 0);
                self.observe_item(*output_index, item, &mut out);
            }
            ResponsesStreamEvent::ContentPartAdded { .. }
            | ResponsesStreamEvent::ContentPartDone { .. } => {}
            ResponsesStreamEvent::OutputTextDelta {
                output_index,
                content_index,
                delta,
                ..
            } => {
                self.ensure_response("", 0);
                self.append_text(*output_index, *content_index, delta, &mut out);
            }
            ResponsesStreamEvent::OutputTextDone {
                output_index,
                content_index,
                text,
                ..
            } => {
                self.ensure_response("", 0);
                self.complete_text(*output_index, *content_index, text, &mut out);
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                item_id,
                output_index,
                delta,
            } => {
                self.ensure_response("", 0);
                let index = self.tool_slot(item_id, *output_index, None, None, &mut out);
                self.append_arguments(index, delta, &mut out);
            }
            ResponsesStreamEvent::FunctionCallArgumentsDone {
                item_id,
                output_index,
                arguments,
            } => {
                self.ensure_response("", 0);
                let index = self.tool_slot(item_id, *output_index, None, None, &mut out);
                self.complete_arguments(index, arguments, &mut out);
            }
            ResponsesStreamEvent::ReasoningSummaryTextDelta { delta, .. } => {
                self.ensure_response("", 0);
                if let Some(acc) = self.acc.as_mut() {
                    acc.reasoning.push_str(delta);
                }
                let chunk = self.chunk(
                    ChunkDelta {
                        reasoning_content: Some(delta.clone()),
                        ..ChunkDelta::default()
                    },
                    None,
                );
                out.push(chunk);
            }
            ResponsesStreamEvent::WebSearchCallCompleted { item_id, .. } if !item_id.is_empty() => {
                self.meter.record(Some(item_id.as_str()), None, &[]);
            }
            ResponsesStreamEvent::WebSearchCallCompleted { .. } => {}
            ResponsesStreamEvent::Completed { response }
            | ResponsesStreamEvent::Incomplete { response } => {
                self.ensure_response(&response.id, response.created_at);
                self.complete_from_snapshot(response, &mut out);
            }
            ResponsesStreamEvent::Failed { response } => {
                self.ensure_response(&response.id, response.created_at);
                self.complete_from_snapshot(response, &mut out);
                self.failure = Some(failed_response_error(response));
            }
            ResponsesStreamEvent::Error { code, message } => {
                self.finished = true;
                return Err(GatewayError::Upstream {
                    status: None,
                    error_type: code.clone(),
                    message: message.clone(),
                });
            }
            ResponsesStreamEvent::Unknown => {}
        }

        Ok(out)
    }

    /// Close the stream. Emits the finish and usage chunks if the provider never
    /// sent a terminal event, and always returns the best-known usage.
    pub fn finish(&mut self) -> (Vec<ChatCompletionChunk>, UsageRecord) {
        let mut out = Vec::new();
        if !self.finished {
            self.ensure_response("", 0);
            let saw_tools = self.acc.as_ref().is_some_and(|a| !a.tools.is_empty());
            out.push(self.chunk(ChunkDelta::default(), Some(finish_reason(None, saw_tools))));
            if let Some(chunk) = self.usage_chunk() {
                out.push(chunk);
            }
            self.finished = true;
        }
        (out, self.usage())
    }

    /// Best-known usage so far; total recomputed as prompt + completion if missing.
    pub fn usage(&self) -> UsageRecord {
        let mut usage = self
            .acc
            .as_ref()
            .map(|a| a.usage.clone())
            .unwrap_or_default();
        usage.finalize_total();
        usage
    }

    /// The error carried by a `response.failed` terminal event, once.
    pub fn take_failure(&mut self) -> Option<GatewayError> {
        self.failure.take()
    }

    /// Distinct web-search calls observed in this response.
    pub fn search_calls(&self) -> u64 {
        self.meter.calls()
    }

    /// All text emitted so far, in output order.
    pub fn text(&self) -> String {
        self.acc
            .as_ref()
            .map(|a| a.text.values().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Emitted text, reasoning and tool arguments, for local usage estimation.
    pub fn completion_text(&self) -> String {
        let Some(acc) = self.acc.as_ref() else {
            return String::new();
        };
        let mut all = self.text();
        all.push_str(&acc.reasoning);
        for tool in acc.tools.values() {
            all.push_str(&tool.arguments);
        }
        all
    }

    // -- internals ----------------------------------------------------------

    fn ensure_response(&mut self, id: &str, created: u64) {
        let current = self.acc.as_ref().map(|a| a.response_id.clone());
        match current {
            None => self.acc = Some(StreamAccumulator::new(id, created)),
            Some(cur) if cur.is_empty() => {
                if let Some(acc) = self.acc.as_mut() {
                    acc.response_id = id.to_string();
                }
            }
            Some(cur) if id.is_empty() || cur == id => {}
            Some(cur) => {
                tracing::debug!(old = %cur, new = %id, "New response id, resetting accumulator");
                self.acc = Some(StreamAccumulator::new(id, created));
            }
        }
    }

    fn chunk(&mut self, mut delta: ChunkDelta, finish: Option<&str>) -> ChatCompletionChunk {
        let (id, created) = match self.acc.as_mut() {
            Some(acc) => {
                if !acc.role_sent {
                    delta.role = Some("assistant".to_string());
                    acc.role_sent = true;
                }
                (acc.response_id.clone(), acc.created)
            }
            None => (String::new(), unix_now()),
        };
        ChatCompletionChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn usage_chunk(&mut self) -> Option<ChatCompletionChunk> {
        if self.usage_sent {
            return None;
        }
        self.usage_sent = true;
        let usage = self.usage();
        let acc = self.acc.as_ref()?;
        Some(ChatCompletionChunk {
            id: acc.response_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: acc.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(ChatUsage::from_record(&usage)),
        })
    }

    fn append_text(&mut self, output_index: u32, content_index: u32, delta: &str, out: &mut Vec<ChatCompletionChunk>) {
        if delta.is_empty() {
            return;
        }
        if let Some(acc) = self.acc.as_mut() {
            acc.text
                .entry((output_index, content_index))
                .or_default()
                .push_str(delta);
        }
        let chunk = self.chunk(
            ChunkDelta {
                content: Some(delta.to_string()),
                ..ChunkDelta::default()
            },
            None,
        );
        out.push(chunk);
    }

    /// Emit whatever part of `full` has not been streamed yet for this slot.
    fn complete_text(&mut self, output_index: u32, content_index: u32, full: &str, out: &mut Vec<ChatCompletionChunk>) {
        let seen = self
            .acc
            .as_ref()
            .and_then(|a| a.text.get(&(output_index, content_index)))
            .cloned()
            .unwrap_or_default();
        if let Some(suffix) = full.strip_prefix(seen.as_str()) {
            let suffix = suffix.to_string();
            self.append_text(output_index, content_index, &suffix, out);
        } else {
            tracing::debug!(output_index, content_index, "Final text diverges from streamed deltas, keeping streamed text");
        }
    }

    /// Find or create the argument buffer for a function call, emitting the
    /// call header chunk the first time it is seen.
    fn tool_slot(
        &mut self,
        item_id: &str,
        output_index: Option<u32>,
        call_id: Option<&str>,
        name: Option<&str>,
        out: &mut Vec<ChatCompletionChunk>,
    ) -> u32 {
        let Some(acc) = self.acc.as_mut() else {
            return 0;
        };
        let index = output_index
            .or_else(|| acc.item_outputs.get(item_id).copied())
            .unwrap_or_else(|| {
                // Position-derived slot past every known output index.
                acc.tools.keys().chain(acc.text.keys().map(|(o, _)| o)).max().map_or(0, |m| m + 1)
            });
        if !item_id.is_empty() {
            acc.item_outputs.insert(item_id.to_string(), index);
        }
        if acc.tools.contains_key(&index) {
            return index;
        }

        let chat_index = acc.next_tool_index;
        acc.next_tool_index += 1;
        let call_id = call_id
            .filter(|c| !c.is_empty())
            .unwrap_or(item_id)
            .to_string();
        acc.tools.insert(
            index,
            ToolBuffer {
                chat_index,
                call_id: call_id.clone(),
                arguments: String::new(),
            },
        );

        let chunk = self.chunk(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: chat_index,
                    id: Some(call_id),
                    call_type: Some("function".to_string()),
                    function: Some(ChunkToolCallFunction {
                        name: Some(name.unwrap_or_default().to_string()),
                        arguments: Some(String::new()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            None,
        );
        out.push(chunk);
        index
    }

    fn append_arguments(&mut self, index: u32, delta: &str, out: &mut Vec<ChatCompletionChunk>) {
        if delta.is_empty() {
            return;
        }
        let Some(chat_index) = self.acc.as_mut().and_then(|a| a.tools.get_mut(&index)).map(|t| {
            t.arguments.push_str(delta);
            t.chat_index
        }) else {
            return;
        };
        let chunk = self.chunk(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: chat_index,
                    id: None,
                    call_type: None,
                    function: Some(ChunkToolCallFunction {
                        name: None,
                        arguments: Some(delta.to_string()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            None,
        );
        out.push(chunk);
    }

    fn complete_arguments(&mut self, index: u32, full: &str, out: &mut Vec<ChatCompletionChunk>) {
        let seen = self
            .acc
            .as_ref()
            .and_then(|a| a.tools.get(&index))
            .map(|t| t.arguments.clone())
            .unwrap_or_default();
        if let Some(suffix) = full.strip_prefix(seen.as_str()) {
            let suffix = suffix.to_string();
            self.append_arguments(index, &suffix, out);
        } else {
            tracing::debug!(index, "Final arguments diverge from streamed deltas, keeping streamed arguments");
        }
    }

    fn observe_item(&mut self, output_index: u32, item: &OutputItem, out: &mut Vec<ChatCompletionChunk>) {
        match item {
            OutputItem::Typed(TypedOutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
                ..
            }) => {
                let index = self.tool_slot(id, Some(output_index), Some(call_id), Some(name), out);
                if !arguments.is_empty() {
                    self.complete_arguments(index, arguments, out);
                }
            }
            OutputItem::Typed(TypedOutputItem::Message { content, .. }) => {
                for (content_index, part) in content.iter().enumerate() {
                    if let OutputContent::Typed(TypedOutputContent::OutputText { text, .. }) = part {
                        let content_index = u32::try_from(content_index).unwrap_or(u32::MAX);
                        self.complete_text(output_index, content_index, text, out);
                    }
                }
            }
            OutputItem::Typed(TypedOutputItem::WebSearchCall { .. }) => {
                record_web_search(item, &mut self.meter);
            }
            _ => {}
        }
    }

    fn complete_from_snapshot(&mut self, response: &ResponsesResponse, out: &mut Vec<ChatCompletionChunk>) {
        for (output_index, item) in response.output.iter().enumerate() {
            let output_index = u32::try_from(output_index).unwrap_or(u32::MAX);
            self.observe_item(output_index, item, out);
        }

        if let (Some(reported), Some(acc)) = (response.usage.as_ref(), self.acc.as_mut()) {
            acc.usage.merge_report(&reported.to_record());
        }

        let saw_tools = self.acc.as_ref().is_some_and(|a| !a.tools.is_empty());
        let finish = finish_reason(response.status.as_deref(), saw_tools);
        out.push(self.chunk(ChunkDelta::default(), Some(finish)));
        if let Some(chunk) = self.usage_chunk() {
            out.push(chunk);
        }
        self.finished = true;
    }
}

fn failed_response_error(response: &ResponsesResponse) -> GatewayError {
    let error = response.error.as_ref();
    let field = |name: &str| {
        error
            .and_then(|e| e.get(name))
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    GatewayError::Upstream {
        status: None,
        error_type: field("code"),
        message: field("message").unwrap_or_else(|| format!("response {} failed", response.id)),
    }
}

/// Replay a complete chat response as a chunk stream: content, tool calls,
/// finish reason, then a usage-only chunk.
pub fn chunks_from_response(resp: &ChatCompletionResponse) -> Vec<ChatCompletionChunk> {
    let make = |delta: ChunkDelta, finish: Option<String>| ChatCompletionChunk {
        id: resp.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: resp.created,
        model: resp.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish,
        }],
        usage: None,
    };

    let mut chunks = Vec::new();
    let Some(choice) = resp.choices.first() else {
        return chunks;
    };

    chunks.push(make(
        ChunkDelta {
            role: Some("assistant".to_string()),
            reasoning_content: choice.message.reasoning_content.clone(),
            ..ChunkDelta::default()
        },
        None,
    ));
    if let Some(text) = choice.message.content.as_ref().filter(|t| !t.is_empty()) {
        chunks.push(make(
            ChunkDelta {
                content: Some(text.clone()),
                ..ChunkDelta::default()
            },
            None,
        ));
    }
    for (index, tc) in choice.message.tool_calls.iter().flatten().enumerate() {
        chunks.push(make(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: index as u64,
                    id: Some(tc.id.clone()),
                    call_type: Some("function".to_string()),
                    function: Some(ChunkToolCallFunction {
                        name: Some(tc.function.name.clone()),
                        arguments: Some(tc.function.arguments.clone()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            None,
        ));
    }
    chunks.push(make(ChunkDelta::default(), choice.finish_reason.clone()));
    if let Some(ref usage) = resp.usage {
        chunks.push(ChatCompletionChunk {
            choices: Vec::new(),
            usage: Some(usage.clone()),
            ..make(ChunkDelta::default(), None)
        });
    }
    chunks
}
