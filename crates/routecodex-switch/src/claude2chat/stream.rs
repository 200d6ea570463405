use routecodex_protocol::openai::chat::{ChatCompletionChunk, FinishReason};
use routecodex_protocol::sse::{SseEvent, encode_sse};
use routecodex_protocol::usage::Usage;
use serde_json::{Value as JsonValue, json};

use crate::error::classify_sse_error;
use crate::{StreamOut, StreamTransformer};

/// Maps an upstream chat-completions SSE stream onto Anthropic events,
/// terminating with `message_stop`.
pub struct ChatToClaudeStream {
    id: String,
    model: String,
    started: bool,
    text_block_open: bool,
    tool_block_open: bool,
    block_index: u32,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl ChatToClaudeStream {
    pub fn new(model: String) -> Self {
        Self {
            id: "msg_stream".to_string(),
            model,
            started: false,
            text_block_open: false,
            tool_block_open: false,
            block_index: 0,
            finish: None,
            usage: None,
            done: false,
        }
    }

    fn frame(&self, name: &str, data: JsonValue) -> StreamOut {
        StreamOut::Frame(encode_sse(Some(name), &data.to_string()))
    }

    fn message_start(&mut self) -> Vec<StreamOut> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![self.frame(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            }),
        )]
    }

    fn close_open_block(&mut self) -> Vec<StreamOut> {
        if !self.text_block_open && !self.tool_block_open {
            return Vec::new();
        }
        self.text_block_open = false;
        self.tool_block_open = false;
        let index = self.block_index;
        self.block_index += 1;
        vec![self.frame(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        )]
    }

    fn terminate(&mut self) -> Vec<StreamOut> {
        let mut out = self.message_start();
        out.extend(self.close_open_block());
        let stop_reason = match self.finish {
            Some(FinishReason::Length) => "max_tokens",
            Some(FinishReason::ToolCalls) => "tool_use",
            Some(FinishReason::ContentFilter) => "refusal",
            _ => "end_turn",
        };
        let usage = self.usage.unwrap_or_default();
        out.push(self.frame(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason},
                "usage": {
                    "input_tokens": usage.prompt_tokens,
                    "output_tokens": usage.completion_tokens,
                }
            }),
        ));
        out.push(self.frame("message_stop", json!({"type": "message_stop"})));
        out.push(StreamOut::Done);
        self.done = true;
        out
    }
}

impl StreamTransformer for ChatToClaudeStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let data = event.data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            return self.terminate();
        }

        if let Ok(value) = serde_json::from_str::<JsonValue>(data) {
            if value.get("error").is_some() {
                self.done = true;
                return vec![StreamOut::Error(classify_sse_error(&value))];
            }
        }

        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.started && !chunk.id.is_empty() {
            self.id = format!("msg_{}", chunk.id.trim_start_matches("chatcmpl-"));
        }
        out.extend(self.message_start());
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.normalized());
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    if self.tool_block_open {
                        out.extend(self.close_open_block());
                    }
                    if !self.text_block_open {
                        self.text_block_open = true;
                        out.push(self.frame(
                            "content_block_start",
                            json!({
                                "type": "content_block_start",
                                "index": self.block_index,
                                "content_block": {"type": "text", "text": ""},
                            }),
                        ));
                    }
                    out.push(self.frame(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "text_delta", "text": content},
                        }),
                    ));
                }
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    if let Some(id) = &call.id {
                        out.extend(self.close_open_block());
                        self.tool_block_open = true;
                        out.push(self.frame(
                            "content_block_start",
                            json!({
                                "type": "content_block_start",
                                "index": self.block_index,
                                "content_block": {
                                    "type": "tool_use",
                                    "id": id,
                                    "name": call.function.as_ref().and_then(|f| f.name.clone()),
                                    "input": {},
                                },
                            }),
                        ));
                    }
                    if let Some(arguments) = call
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.clone())
                        .filter(|a| !a.is_empty())
                    {
                        out.push(self.frame(
                            "content_block_delta",
                            json!({
                                "type": "content_block_delta",
                                "index": self.block_index,
                                "delta": {"type": "input_json_delta", "partial_json": arguments},
                            }),
                        ));
                    }
                }
            }
            if let Some(finish) = choice.finish_reason {
                self.finish = Some(finish);
            }
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
