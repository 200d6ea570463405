use std::collections::BTreeMap;

use routecodex_protocol::claude::stream::{
    ContentBlockDelta, MessagesStreamEvent, StreamContentBlock,
};
use routecodex_protocol::openai::chat::{
    ChatCompletionChunk, ChatRole, ChunkChoice, ChunkDelta, FinishReason, ToolCallChunk,
    ToolCallChunkFunction,
};
use routecodex_protocol::sse::{SseEvent, encode_openai_done, encode_sse};
use routecodex_protocol::usage::Usage;

use crate::error::classify_sse_error;
use crate::{StreamOut, StreamTransformer};

/// Maps an upstream Anthropic SSE stream onto chat-completions chunks.
pub struct ClaudeToChatStream {
    id: String,
    model: String,
    role_emitted: bool,
    /// Anthropic block index -> chat tool_calls index.
    tool_indexes: BTreeMap<u32, u32>,
    next_tool_index: u32,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl ClaudeToChatStream {
    pub fn new(model: String) -> Self {
        Self {
            id: "chatcmpl-stream".to_string(),
            model,
            role_emitted: false,
            tool_indexes: BTreeMap::new(),
            next_tool_index: 0,
            finish: None,
            usage: None,
            done: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>, usage: Option<Usage>) -> StreamOut {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        match serde_json::to_string(&chunk) {
            Ok(data) => StreamOut::Frame(encode_sse(None, &data)),
            Err(err) => StreamOut::Error(routecodex_common::GatewayError::conversion(err.to_string())),
        }
    }

    fn role_chunk(&mut self) -> Option<StreamOut> {
        if self.role_emitted {
            return None;
        }
        self.role_emitted = true;
        Some(self.chunk(
            ChunkDelta {
                role: Some(ChatRole::Assistant),
                content: None,
                tool_calls: None,
            },
            None,
            None,
        ))
    }

    fn terminate(&mut self) -> Vec<StreamOut> {
        let mut out = Vec::new();
        if let Some(chunk) = self.role_chunk() {
            out.push(chunk);
        }
        out.push(self.chunk(
            ChunkDelta::default(),
            Some(self.finish.unwrap_or(FinishReason::Stop)),
            self.usage,
        ));
        out.push(StreamOut::Frame(encode_openai_done()));
        out.push(StreamOut::Done);
        self.done = true;
        out
    }
}

impl StreamTransformer for ClaudeToChatStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let data = event.data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        let Ok(parsed) = serde_json::from_str::<MessagesStreamEvent>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        match parsed {
            MessagesStreamEvent::MessageStart { message } => {
                self.id = format!("chatcmpl-{}", message.id.trim_start_matches("msg_"));
                if let Some(chunk) = self.role_chunk() {
                    out.push(chunk);
                }
            }
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StreamContentBlock::Text { text } => {
                    if let Some(chunk) = self.role_chunk() {
                        out.push(chunk);
                    }
                    if !text.is_empty() {
                        out.push(self.chunk(
                            ChunkDelta {
                                role: None,
                                content: Some(text),
                                tool_calls: None,
                            },
                            None,
                            None,
                        ));
                    }
                }
                StreamContentBlock::ToolUse { id, name, .. } => {
                    if let Some(chunk) = self.role_chunk() {
                        out.push(chunk);
                    }
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indexes.insert(index, tool_index);
                    out.push(self.chunk(
                        ChunkDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ToolCallChunk {
                                index: tool_index,
                                id: Some(id),
                                r#type: Some("function".to_string()),
                                function: Some(ToolCallChunkFunction {
                                    name: Some(name),
                                    arguments: None,
                                }),
                            }]),
                        },
                        None,
                        None,
                    ));
                }
                StreamContentBlock::Thinking { .. } | StreamContentBlock::Unknown(_) => {}
            },
            MessagesStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        if let Some(chunk) = self.role_chunk() {
                            out.push(chunk);
                        }
                        out.push(self.chunk(
                            ChunkDelta {
                                role: None,
                                content: Some(text),
                                tool_calls: None,
                            },
                            None,
                            None,
                        ));
                    }
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    if !partial_json.is_empty() {
                        let tool_index = self.tool_indexes.get(&index).copied().unwrap_or(0);
                        out.push(self.chunk(
                            ChunkDelta {
                                role: None,
                                content: None,
                                tool_calls: Some(vec![ToolCallChunk {
                                    index: tool_index,
                                    id: None,
                                    r#type: Some("function".to_string()),
                                    function: Some(ToolCallChunkFunction {
                                        name: None,
                                        arguments: Some(partial_json),
                                    }),
                                }]),
                            },
                            None,
                            None,
                        ));
                    }
                }
                ContentBlockDelta::ThinkingDelta { .. }
                | ContentBlockDelta::SignatureDelta { .. } => {}
            },
            MessagesStreamEvent::ContentBlockStop { .. } => {}
            MessagesStreamEvent::MessageDelta { delta, usage } => {
                if let Some(stop_reason) = delta.stop_reason {
                    self.finish = Some(match stop_reason {
                        routecodex_protocol::claude::messages::StopReason::MaxTokens => {
                            FinishReason::Length
                        }
                        routecodex_protocol::claude::messages::StopReason::ToolUse => {
                            FinishReason::ToolCalls
                        }
                        routecodex_protocol::claude::messages::StopReason::Refusal => {
                            FinishReason::ContentFilter
                        }
                        _ => FinishReason::Stop,
                    });
                }
                if let Some(usage) = usage {
                    self.usage = Some(Usage::new(usage.input_tokens, usage.output_tokens));
                }
            }
            MessagesStreamEvent::MessageStop => {
                out.extend(self.terminate());
            }
            MessagesStreamEvent::Ping => {}
            MessagesStreamEvent::Error { error } => {
                self.done = true;
                out.push(StreamOut::Error(classify_sse_error(&error)));
            }
            MessagesStreamEvent::Unknown(_) => {}
        }
        out
    }

    fn finish(&mut self) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        self.terminate()
    }
}
