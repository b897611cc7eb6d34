//! Chat-completion chunks re-emitted as a structured-response event stream.
//!
//! Used when a structured-response caller is served by a chat or converse
//! channel. Each chat delta kind opens its own output item (reasoning, message,
//! function call); switching kinds closes the open item with its `.done` events.

use super::chat_types::ChatCompletionChunk;
use super::responses_types::{
    IncompleteDetails, OutputContent, OutputItem, ResponsesResponse, ResponsesStreamEvent,
    ResponsesUsage, SummaryText, TypedOutputItem,
};
use super::{new_id, unix_now};
use crate::usage::UsageRecord;
use serde_json::Value;

#[derive(Debug)]
enum OpenItem {
    None,
    Reasoning { index: u32, id: String, text: String },
    Message { index: u32, id: String, text: String },
}

#[derive(Debug)]
struct CallItem {
    output_index: u32,
    id: String,
    call_id: String,
    name: String,
    arguments: String,
    closed: bool,
}

#[derive(Debug)]
pub struct ResponsesStreamEncoder {
    model: String,
    response_id: String,
    created_at: u64,
    started: bool,
    finished: bool,
    sequence: u64,
    open: OpenItem,
    /// Chat tool-call index to call state.
    calls: Vec<Option<CallItem>>,
    /// Closed items in output order, for the final snapshot.
    output: Vec<(u32, OutputItem)>,
    next_output_index: u32,
    finish_reason: Option<String>,
    usage: UsageRecord,
}

impl ResponsesStreamEncoder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: new_id("resp_"),
            created_at: unix_now(),
            started: false,
            finished: false,
            sequence: 0,
            open: OpenItem::None,
            calls: Vec::new(),
            output: Vec::new(),
            next_output_index: 0,
            finish_reason: None,
            usage: UsageRecord::default(),
        }
    }

    pub fn usage(&self) -> &UsageRecord {
        &self.usage
    }

    /// Serialize an event with the next sequence number.
    pub fn encode(&mut self, event: &ResponsesStreamEvent) -> Value {
        let value = event.to_json(self.sequence);
        self.sequence += 1;
        value
    }

    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.start(&mut events);

        if let Some(ref usage) = chunk.usage {
            self.usage.merge_report(&usage.to_record());
        }
        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(reasoning) = choice.delta.reasoning_content.as_deref().filter(|s| !s.is_empty()) {
            if !matches!(self.open, OpenItem::Reasoning { .. }) {
                self.close_open(&mut events);
                let index = self.take_output_index();
                let id = new_id("rs_");
                events.push(ResponsesStreamEvent::OutputItemAdded {
                    output_index: index,
                    item: reasoning_item(&id, None),
                });
                self.open = OpenItem::Reasoning {
                    index,
                    id,
                    text: String::new(),
                };
            }
            if let OpenItem::Reasoning { index, id, text } = &mut self.open {
                text.push_str(reasoning);
                events.push(ResponsesStreamEvent::ReasoningSummaryTextDelta {
                    item_id: id.clone(),
                    output_index: *index,
                    delta: reasoning.to_string(),
                });
            }
        }

        if let Some(content) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            if !matches!(self.open, OpenItem::Message { .. }) {
                self.close_open(&mut events);
                let index = self.take_output_index();
                let id = new_id("msg_");
                events.push(ResponsesStreamEvent::OutputItemAdded {
                    output_index: index,
                    item: message_item(&id, None, "in_progress"),
                });
                events.push(ResponsesStreamEvent::ContentPartAdded {
                    item_id: id.clone(),
                    output_index: index,
                    content_index: 0,
                    part: OutputContent::text(""),
                });
                self.open = OpenItem::Message {
                    index,
                    id,
                    text: String::new(),
                };
            }
            if let OpenItem::Message { index, id, text } = &mut self.open {
                text.push_str(content);
                events.push(ResponsesStreamEvent::OutputTextDelta {
                    item_id: id.clone(),
                    output_index: *index,
                    content_index: 0,
                    delta: content.to_string(),
                });
            }
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            let slot = tc.index as usize;
            if !matches!(self.calls.get(slot), Some(Some(_))) {
                self.close_open(&mut events);
                let output_index = self.take_output_index();
                let call = CallItem {
                    output_index,
                    id: new_id("fc_"),
                    call_id: tc.id.clone().unwrap_or_else(|| new_id("call_")),
                    name: tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default(),
                    arguments: String::new(),
                    closed: false,
                };
                events.push(ResponsesStreamEvent::OutputItemAdded {
                    output_index,
                    item: call_item(&call, "in_progress"),
                });
                if self.calls.len() <= slot {
                    self.calls.resize_with(slot + 1, || None);
                }
                self.calls[slot] = Some(call);
            }
            let args = tc
                .function
                .as_ref()
                .and_then(|f| f.arguments.as_deref())
                .filter(|a| !a.is_empty());
            if let (Some(args), Some(Some(call))) = (args, self.calls.get_mut(slot)) {
                call.arguments.push_str(args);
                events.push(ResponsesStreamEvent::FunctionCallArgumentsDelta {
                    item_id: call.id.clone(),
                    output_index: Some(call.output_index),
                    delta: args.to_string(),
                });
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        events
    }

    /// Close every open item and emit the terminal event with the full snapshot.
    pub fn finish(&mut self) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.start(&mut events);
        self.close_open(&mut events);
        self.close_calls(&mut events);
        self.finished = true;

        let mut response = self.snapshot("completed");
        if self.finish_reason.as_deref() == Some("length") {
            response.status = Some("incomplete".to_string());
            response.incomplete_details = Some(IncompleteDetails {
                reason: "max_output_tokens".to_string(),
            });
            events.push(ResponsesStreamEvent::Incomplete { response });
        } else {
            events.push(ResponsesStreamEvent::Completed { response });
        }
        events
    }

    fn start(&mut self, events: &mut Vec<ResponsesStreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        let response = self.snapshot("in_progress");
        events.push(ResponsesStreamEvent::Created {
            response: response.clone(),
        });
        events.push(ResponsesStreamEvent::InProgress { response });
    }

    fn take_output_index(&mut self) -> u32 {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }

    fn close_open(&mut self, events: &mut Vec<ResponsesStreamEvent>) {
        match std::mem::replace(&mut self.open, OpenItem::None) {
            OpenItem::None => {}
            OpenItem::Reasoning { index, id, text } => {
                let item = reasoning_item(&id, Some(text));
                events.push(ResponsesStreamEvent::OutputItemDone {
                    output_index: index,
                    item: item.clone(),
                });
                self.output.push((index, item));
            }
            OpenItem::Message { index, id, text } => {
                events.push(ResponsesStreamEvent::OutputTextDone {
                    item_id: id.clone(),
                    output_index: index,
                    content_index: 0,
                    text: text.clone(),
                });
                events.push(ResponsesStreamEvent::ContentPartDone {
                    item_id: id.clone(),
                    output_index: index,
                    content_index: 0,
                    part: OutputContent::text(text.clone()),
                });
                let item = message_item(&id, Some(text), "completed");
                events.push(ResponsesStreamEvent::OutputItemDone {
                    output_index: index,
                    item: item.clone(),
                });
                self.output.push((index, item));
            }
        }
    }

    fn close_calls(&mut self, events: &mut Vec<ResponsesStreamEvent>) {
        for call in self.calls.iter_mut().flatten() {
            if call.closed {
                continue;
            }
            call.closed = true;
            events.push(ResponsesStreamEvent::FunctionCallArgumentsDone {
                item_id: call.id.clone(),
                output_index: Some(call.output_index),
                arguments: call.arguments.clone(),
            });
            let item = call_item(call, "completed");
            events.push(ResponsesStreamEvent::OutputItemDone {
                output_index: call.output_index,
                item: item.clone(),
            });
            self.output.push((call.output_index, item));
        }
    }

    fn snapshot(&self, status: &str) -> ResponsesResponse {
        let mut output = self.output.clone();
        output.sort_by_key(|(index, _)| *index);
        let mut usage = self.usage.clone();
        usage.finalize_total();
        ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            model: self.model.clone(),
            status: Some(status.to_string()),
            output: output.into_iter().map(|(_, item)| item).collect(),
            usage: (!usage.is_empty()).then(|| ResponsesUsage::from_record(&usage)),
            incomplete_details: None,
            error: None,
        }
    }
}

fn reasoning_item(id: &str, text: Option<String>) -> OutputItem {
    OutputItem::Typed(TypedOutputItem::Reasoning {
        id: id.to_string(),
        summary: text.map(SummaryText::new).into_iter().collect(),
        encrypted_content: None,
    })
}

fn message_item(id: &str, text: Option<String>, status: &str) -> OutputItem {
    OutputItem::Typed(TypedOutputItem::Message {
        id: id.to_string(),
        role: "assistant".to_string(),
        content: text.map(OutputContent::text).into_iter().collect(),
        status: Some(status.to_string()),
    })
}

fn call_item(call: &CallItem, status: &str) -> OutputItem {
    OutputItem::Typed(TypedOutputItem::FunctionCall {
        id: call.id.clone(),
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        arguments: if status == "completed" {
            call.arguments.clone()
        } else {
            String::new()
        },
        status: Some(status.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::chat_types::*;
    use crate::translate::streaming::ResponsesStreamReconstructor;

    fn chunk(delta: ChunkDelta, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "llama-3".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn text(content: &str) -> ChatCompletionChunk {
        chunk(
            ChunkDelta {
                content: Some(content.to_string()),
                ..ChunkDelta::default()
            },
            None,
        )
    }

    fn names(events: &[ResponsesStreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[test]
    fn test_text_stream_lifecycle() {
        let mut enc = ResponsesStreamEncoder::new("llama-3");
        let events = enc.process_chunk(&text("Hel"));
        assert_eq!(
            names(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
            ]
        );
        enc.process_chunk(&text("lo"));
        enc.process_chunk(&chunk(ChunkDelta::default(), Some("stop")));
        let events = enc.finish();
        assert_eq!(
            names(&events),
            vec![
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        match events.last() {
            Some(ResponsesStreamEvent::Completed { response }) => {
                assert_eq!(response.output.len(), 1);
                assert_eq!(response.status.as_deref(), Some("completed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut enc = ResponsesStreamEncoder::new("llama-3");
        let events = enc.process_chunk(&text("a"));
        let seqs: Vec<u64> = events
            .iter()
            .map(|e| enc.encode(e)["sequence_number"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_length_finish_is_incomplete() {
        let mut enc = ResponsesStreamEncoder::new("llama-3");
        enc.process_chunk(&text("cut"));
        enc.process_chunk(&chunk(ChunkDelta::default(), Some("length")));
        let events = enc.finish();
        assert_eq!(events.last().unwrap().event_name(), "response.incomplete");
    }

    #[test]
    fn test_encoded_stream_reconstructs_to_same_chat_output() {
        let tool = chunk(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: 0,
                    id: Some("call_1".to_string()),
                    call_type: Some("function".to_string()),
                    function: Some(ChunkToolCallFunction {
                        name: Some("lookup".to_string()),
                        arguments: Some("{\"k\":".to_string()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            None,
        );
        let tool_more = chunk(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: 0,
                    id: None,
                    call_type: None,
                    function: Some(ChunkToolCallFunction {
                        name: None,
                        arguments: Some("1}".to_string()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            Some("tool_calls"),
        );

        let mut enc = ResponsesStreamEncoder::new("llama-3");
        let mut events = Vec::new();
        for c in [text("one moment"), tool, tool_more] {
            events.extend(enc.process_chunk(&c));
        }
        events.extend(enc.finish());

        let mut rec = ResponsesStreamReconstructor::new("llama-3");
        let mut content = String::new();
        let mut args = String::new();
        let mut finish = None;
        for e in &events {
            for c in rec.process_event(e).unwrap() {
                for choice in c.choices {
                    if let Some(t) = choice.delta.content {
                        content.push_str(&t);
                    }
                    for tc in choice.delta.tool_calls.into_iter().flatten() {
                        if let Some(a) = tc.function.and_then(|f| f.arguments) {
                            args.push_str(&a);
                        }
                    }
                    if choice.finish_reason.is_some() {
                        finish = choice.finish_reason;
                    }
                }
            }
        }
        assert_eq!(content, "one moment");
        assert_eq!(args, "{\"k\":1}");
        assert_eq!(finish.as_deref(), Some("tool_calls"));
    }
}
