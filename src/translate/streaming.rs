//! State machine for re-emitting upstream streaming chunks as Anthropic SSE events.
//!
//! The [`StreamTranslator`] processes chunks one at a time and keeps track of
//! which content blocks are open. Block index 0 is always the text block and is
//! opened as soon as the stream starts; tool calls get indices 1..N in the
//! order they are first seen. [`translate_stream`] drives a translator over an
//! async chunk sequence and frames the result, ending with exactly one
//! `data: [DONE]` marker whichever way the upstream sequence ends.

use std::collections::{BTreeSet, HashMap};

use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StopReason,
    StreamEvent, Usage,
};
use super::extract::{ChunkParts, StreamChunk, ToolArguments, ToolCallDeltaParts};
use super::response::{map_finish_reason, new_message_id, new_tool_use_id};
use crate::error::Result;

const TEXT_BLOCK_INDEX: usize = 0;

/// One server-sent event as written to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// `None` only for the terminal marker.
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Every event yields a frame. The event types always serialize; should one
    /// not, the frame still goes out carrying only its `type`, so block
    /// starts and stops stay paired on the wire.
    pub fn from_event(event: &StreamEvent) -> Self {
        let name = event.event_name();
        let data = serde_json::to_string(event).unwrap_or_else(|e| {
            error!(event = name, error = %e, "Failed to serialize stream event");
            serde_json::json!({ "type": name }).to_string()
        });
        Self {
            event: Some(name.to_string()),
            data,
        }
    }

    /// The `data: [DONE]` terminal marker.
    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == "[DONE]"
    }

    pub fn to_wire(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {}\ndata: {}\n\n", event, self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

/// State machine that translates upstream streaming chunks into Anthropic SSE events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-3-5-sonnet-20241022");
///   let mut events = translator.start();
///   for chunk in chunks {
///       events.extend(translator.process_chunk(&chunk));
///   }
///   events.extend(translator.finish(StopReason::EndTurn));
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    text_block_closed: bool,
    accumulated_text: String,
    text_sent: bool,
    /// Upstream tool-call index -> emitted block index. Entries are never
    /// changed once inserted.
    tool_blocks: HashMap<u64, usize>,
    next_tool_index: usize,
    open_tool_indices: BTreeSet<usize>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason_sent: bool,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_message_id(),
            started: false,
            text_block_closed: false,
            accumulated_text: String::new(),
            text_sent: false,
            tool_blocks: HashMap::new(),
            next_tool_index: TEXT_BLOCK_INDEX + 1,
            open_tool_indices: BTreeSet::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason_sent: false,
        }
    }

    /// `message_start`, the opening of text block 0, and a `ping`.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.msg_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Process one upstream chunk. A chunk that cannot be read is logged and
    /// skipped; the stream carries on.
    pub fn process_chunk(&mut self, chunk: &StreamChunk) -> Vec<StreamEvent> {
        match chunk.parts() {
            Ok(parts) => self.process_parts(parts),
            Err(e) => {
                error!(error = %e, chunk = ?chunk, "Skipping malformed stream chunk");
                Vec::new()
            }
        }
    }

    pub fn process_parts(&mut self, parts: ChunkParts) -> Vec<StreamEvent> {
        if self.stop_reason_sent {
            return Vec::new();
        }

        let mut events = self.start();

        if let Some(usage) = parts.usage {
            self.input_tokens = usage.input_tokens;
            self.output_tokens = usage.output_tokens;
        }

        if let Some(text) = parts.content.filter(|t| !t.is_empty()) {
            if self.tool_blocks.is_empty() && !self.text_block_closed {
                self.accumulated_text.push_str(&text);
                self.text_sent = true;
                events.push(text_delta(text));
            } else {
                debug!(len = text.len(), "Dropping text delta received after tool calls started");
            }
        }

        for call in parts.tool_calls {
            if !self.text_block_closed {
                events.extend(self.close_text_block());
            }
            events.extend(self.tool_call_delta(call));
        }

        if let Some(reason) = parts.finish_reason {
            events.extend(self.finish(map_finish_reason(Some(&reason))));
        }

        events
    }

    /// Normal termination: close every open block, then `message_delta` and
    /// `message_stop`. Does nothing once a stop reason has been sent.
    pub fn finish(&mut self, stop_reason: StopReason) -> Vec<StreamEvent> {
        if self.stop_reason_sent {
            return Vec::new();
        }
        let mut events = self.start();
        events.extend(self.close_all_blocks());
        let output_tokens = self.output_tokens;
        events.extend(self.terminate(stop_reason, output_tokens));
        events
    }

    /// Termination after the upstream sequence itself failed: blocks are still
    /// closed, then the message ends with stop_reason `error` and zero usage.
    pub fn fail(&mut self) -> Vec<StreamEvent> {
        if self.stop_reason_sent {
            return Vec::new();
        }
        let mut events = self.start();
        events.extend(self.close_all_blocks());
        events.extend(self.terminate(StopReason::Error, 0));
        events
    }

    pub fn is_finished(&self) -> bool {
        self.stop_reason_sent
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn usage(&self) -> (u64, u64) {
        (self.input_tokens, self.output_tokens)
    }

    fn tool_call_delta(&mut self, call: ToolCallDeltaParts) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let block_index = match self.tool_blocks.get(&call.index) {
            Some(&index) => index,
            None => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_blocks.insert(call.index, index);
                self.open_tool_indices.insert(index);

                let id = call.id.clone().unwrap_or_else(new_tool_use_id);
                let name = call.name.clone().unwrap_or_default();
                debug!(upstream_index = call.index, block = index, tool = %name, "Opening tool block");
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                index
            }
        };

        let fragment = match call.arguments {
            Some(ToolArguments::Text(s)) => s,
            Some(ToolArguments::Json(v)) => v.to_string(),
            None => String::new(),
        };
        if !fragment.is_empty() {
            if self.open_tool_indices.contains(&block_index) {
                events.push(StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: Delta::InputJsonDelta {
                        partial_json: fragment,
                    },
                });
            } else {
                warn!(block = block_index, "Argument fragment for a closed tool block");
            }
        }

        events
    }

    /// Close block 0, first sending any text that was held back.
    fn close_text_block(&mut self) -> Vec<StreamEvent> {
        if self.text_block_closed {
            return Vec::new();
        }
        self.text_block_closed = true;

        let mut events = Vec::new();
        if !self.text_sent && !self.accumulated_text.is_empty() {
            self.text_sent = true;
            events.push(text_delta(self.accumulated_text.clone()));
        }
        events.push(StreamEvent::ContentBlockStop {
            index: TEXT_BLOCK_INDEX,
        });
        events
    }

    /// Tool blocks in ascending index order, then the text block if still open.
    fn close_all_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = std::mem::take(&mut self.open_tool_indices)
            .into_iter()
            .map(|index| StreamEvent::ContentBlockStop { index })
            .collect();
        events.extend(self.close_text_block());
        events
    }

    fn terminate(&mut self, stop_reason: StopReason, output_tokens: u64) -> Vec<StreamEvent> {
        self.stop_reason_sent = true;
        vec![
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: DeltaUsage { output_tokens },
            },
            StreamEvent::MessageStop,
        ]
    }
}

fn text_delta(text: String) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index: TEXT_BLOCK_INDEX,
        delta: Delta::TextDelta { text },
    }
}

fn frames(events: Vec<StreamEvent>) -> Vec<SseFrame> {
    events.iter().map(SseFrame::from_event).collect()
}

/// Drive a [`StreamTranslator`] over an upstream chunk sequence.
///
/// The returned stream always ends with a single [`SseFrame::done`], whether
/// the upstream sent a finish reason, ended without one, or failed part way.
/// Dropping it drops the upstream sequence.
pub fn translate_stream<S>(chunks: S, model: String) -> impl Stream<Item = SseFrame> + Send + 'static
where
    S: Stream<Item = Result<StreamChunk>> + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        for frame in frames(translator.start()) {
            yield frame;
        }

        tokio::pin!(chunks);

        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    for frame in frames(translator.process_chunk(&chunk)) {
                        yield frame;
                    }
                    if translator.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, model = %model, "Upstream stream failed");
                    for frame in frames(translator.fail()) {
                        yield frame;
                    }
                    break;
                }
            }
        }

        if !translator.is_finished() {
            debug!(model = %model, "Upstream ended without a finish reason");
            for frame in frames(translator.finish(StopReason::EndTurn)) {
                yield frame;
            }
        }

        let (input_tokens, output_tokens) = translator.usage();
        debug!(
            model = %model,
            input_tokens,
            output_tokens,
            text_len = translator.accumulated_text().len(),
            "Stream completed"
        );
        yield SseFrame::done();
    }
}
