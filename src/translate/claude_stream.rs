//! State machine for translating chat-completion chunks into message-style SSE events.
//!
//! The [`StreamTranslator`] processes `ChatCompletionChunk`s one at a time,
//! maintaining state about which content blocks are open, and emitting the
//! corresponding stream events (`message_start`, `content_block_delta`, etc.).

use super::anthropic::map_finish_reason;
use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::chat_types::ChatCompletionChunk;
use super::new_id;
use crate::usage::UsageRecord;

/// Tracks state of an in-progress tool call being streamed
#[derive(Debug, Clone)]
struct ActiveToolCall {
    block_index: usize,
    emitted_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
}

/// State machine that translates chat chunks into message-style SSE events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   for chunk in chat_chunks {
///       let events = translator.process_chunk(&chunk);
///       // send each event as SSE
///   }
///   let final_events = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    content_block_index: usize,
    open_block: OpenBlock,
    active_tool_calls: Vec<ActiveToolCall>,
    /// Stop reason seen but not yet sent; chat streams report usage after it.
    pending_stop: Option<String>,
    usage: UsageRecord,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_id("msg_"),
            started: false,
            finished: false,
            content_block_index: 0,
            open_block: OpenBlock::None,
            active_tool_calls: Vec::new(),
            pending_stop: None,
            usage: UsageRecord::default(),
        }
    }

    /// Usage reported by the upstream so far.
    pub fn usage(&self) -> &UsageRecord {
        &self.usage
    }

    /// Process a single chat chunk, returning zero or more message-style events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        if let Some(ref usage) = chunk.usage {
            self.usage.merge_report(&usage.to_record());
        }

        if !self.started {
            events.push(self.make_message_start());
            events.push(StreamEvent::Ping);
            self.started = true;
        }

        let Some(choice) = chunk.choices.first() else {
            // Usage-only trailer after the finish chunk.
            if chunk.usage.is_some() {
                if let Some(reason) = self.pending_stop.take() {
                    events.append(&mut self.make_finish_events(&reason));
                }
            }
            return events;
        };

        if let Some(thinking) = choice.delta.reasoning_content.as_deref().filter(|s| !s.is_empty()) {
            self.open(OpenBlock::Thinking, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index: self.content_block_index,
                delta: Delta::ThinkingDelta {
                    thinking: thinking.to_string(),
                },
            });
        }

        if let Some(content) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.open(OpenBlock::Text, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index: self.content_block_index,
                delta: Delta::TextDelta {
                    text: content.to_string(),
                },
            });
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let tc_index = tc.index as usize;

                // A call id marks the first chunk of a new call.
                if tc.id.is_some() {
                    self.close_open_block(&mut events);

                    let tool_id = tc.id.clone().unwrap_or_default();
                    let tool_name = tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();

                    events.push(StreamEvent::ContentBlockStart {
                        index: self.content_block_index,
                        content_block: ResponseContentBlock::ToolUse {
                            id: tool_id,
                            name: tool_name,
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });

                    while self.active_tool_calls.len() <= tc_index {
                        self.active_tool_calls.push(ActiveToolCall {
                            block_index: 0,
                            emitted_start: false,
                        });
                    }
                    self.active_tool_calls[tc_index] = ActiveToolCall {
                        block_index: self.content_block_index,
                        emitted_start: true,
                    };
                    self.content_block_index += 1;
                }

                if let Some(args) = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_ref())
                    .filter(|a| !a.is_empty())
                {
                    let block_idx = self
                        .active_tool_calls
                        .get(tc_index)
                        .filter(|t| t.emitted_start)
                        .map_or(self.content_block_index, |t| t.block_index);

                    events.push(StreamEvent::ContentBlockDelta {
                        index: block_idx,
                        delta: Delta::InputJsonDelta {
                            partial_json: args.clone(),
                        },
                    });
                }
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.close_all_blocks(&mut events);
            if chunk.usage.is_some() {
                events.append(&mut self.make_finish_events(reason));
            } else {
                self.pending_stop = Some(reason.clone());
            }
        }

        events
    }

    /// Call when the stream ends (on `[DONE]`) to flush any remaining events.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.started {
            events.push(self.make_message_start());
            self.started = true;
        }
        self.close_all_blocks(&mut events);
        let reason = self.pending_stop.take().unwrap_or_else(|| "stop".to_string());
        events.append(&mut self.make_finish_events(&reason));
        events
    }

    fn open(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>) {
        if self.open_block == kind {
            return;
        }
        self.close_open_block(events);
        let content_block = match kind {
            OpenBlock::Thinking => ResponseContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
            _ => ResponseContentBlock::Text {
                text: String::new(),
            },
        };
        events.push(StreamEvent::ContentBlockStart {
            index: self.content_block_index,
            content_block,
        });
        self.open_block = kind;
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block != OpenBlock::None {
            events.push(StreamEvent::ContentBlockStop {
                index: self.content_block_index,
            });
            self.content_block_index += 1;
            self.open_block = OpenBlock::None;
        }
    }

    fn close_all_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_open_block(events);
        for tc in &self.active_tool_calls {
            if tc.emitted_start {
                events.push(StreamEvent::ContentBlockStop {
                    index: tc.block_index,
                });
            }
        }
        self.active_tool_calls.clear();
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.usage.prompt_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }

    fn make_finish_events(&mut self, reason: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        vec![
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(map_finish_reason(reason).to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    input_tokens: self.usage.prompt_tokens,
                    output_tokens: self.usage.completion_tokens,
                },
            },
            StreamEvent::MessageStop,
        ]
    }
}
