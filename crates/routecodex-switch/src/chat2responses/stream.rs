use routecodex_protocol::openai::chat::{
    ChatCompletionChunk, ChatRole, ChunkChoice, ChunkDelta, FinishReason, ToolCallChunk,
    ToolCallChunkFunction,
};
use routecodex_protocol::openai::responses::ResponsesStreamEvent;
use routecodex_protocol::sse::{SseEvent, encode_openai_done, encode_sse};
use routecodex_protocol::usage::{Usage, usage_from_value};

use crate::error::classify_sse_error;
use crate::{StreamOut, StreamTransformer};

/// Maps an upstream Responses SSE stream onto chat-completions chunks.
pub struct ResponsesToChatStream {
    id: String,
    model: String,
    created: i64,
    role_emitted: bool,
    saw_tool_call: bool,
    tool_index: u32,
    done: bool,
}

impl ResponsesToChatStream {
    pub fn new(model: String) -> Self {
        Self {
            id: "chatcmpl-stream".to_string(),
            model,
            created: 0,
            role_emitted: false,
            saw_tool_call: false,
            tool_index: 0,
            done: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>, usage: Option<Usage>) -> StreamOut {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
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

    fn terminate(&mut self, finish_reason: FinishReason, usage: Option<Usage>) -> Vec<StreamOut> {
        let mut out = Vec::new();
        out.push(self.chunk(
            ChunkDelta::default(),
            Some(finish_reason),
            usage,
        ));
        out.push(StreamOut::Frame(encode_openai_done()));
        out.push(StreamOut::Done);
        self.done = true;
        out
    }
}

impl StreamTransformer for ResponsesToChatStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }
        let Ok(parsed) = serde_json::from_str::<ResponsesStreamEvent>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        match parsed {
            ResponsesStreamEvent::Created { response } => {
                if let Some(id) = response.get("id").and_then(|v| v.as_str()) {
                    self.id = id.replace("resp_", "chatcmpl-");
                }
                if let Some(created) = response.get("created_at").and_then(|v| v.as_i64()) {
                    self.created = created;
                }
                if let Some(chunk) = self.role_chunk() {
                    out.push(chunk);
                }
            }
            ResponsesStreamEvent::InProgress { .. } => {}
            ResponsesStreamEvent::OutputItemAdded { item, .. } => {
                if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                    self.saw_tool_call = true;
                    let index = self.tool_index;
                    self.tool_index += 1;
                    if let Some(chunk) = self.role_chunk() {
                        out.push(chunk);
                    }
                    out.push(self.chunk(
                        ChunkDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ToolCallChunk {
                                index,
                                id: item
                                    .get("call_id")
                                    .and_then(|v| v.as_str())
                                    .map(String::from),
                                r#type: Some("function".to_string()),
                                function: Some(ToolCallChunkFunction {
                                    name: item
                                        .get("name")
                                        .and_then(|v| v.as_str())
                                        .map(String::from),
                                    arguments: None,
                                }),
                            }]),
                        },
                        None,
                        None,
                    ));
                }
            }
            ResponsesStreamEvent::OutputTextDelta { delta, .. } => {
                if let Some(chunk) = self.role_chunk() {
                    out.push(chunk);
                }
                if !delta.is_empty() {
                    out.push(self.chunk(
                        ChunkDelta {
                            role: None,
                            content: Some(delta),
                            tool_calls: None,
                        },
                        None,
                        None,
                    ));
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta { delta, .. } => {
                if !delta.is_empty() {
                    let index = self.tool_index.saturating_sub(1);
                    out.push(self.chunk(
                        ChunkDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ToolCallChunk {
                                index,
                                id: None,
                                r#type: Some("function".to_string()),
                                function: Some(ToolCallChunkFunction {
                                    name: None,
                                    arguments: Some(delta),
                                }),
                            }]),
                        },
                        None,
                        None,
                    ));
                }
            }
            ResponsesStreamEvent::OutputTextDone { .. }
            | ResponsesStreamEvent::FunctionCallArgumentsDone { .. } => {}
            ResponsesStreamEvent::Completed { response } => {
                let usage = usage_from_value(&response);
                let finish = if self.saw_tool_call {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                };
                out.extend(self.terminate(finish, usage));
            }
            ResponsesStreamEvent::Done => {
                if !self.done {
                    out.extend(self.terminate(FinishReason::Stop, None));
                }
            }
            ResponsesStreamEvent::Error { error } => {
                out.push(StreamOut::Error(classify_sse_error(&error)));
                self.done = true;
            }
            ResponsesStreamEvent::Unknown(_) => {}
        }
        out
    }

    fn finish(&mut self) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        self.terminate(FinishReason::Stop, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    fn frames_to_text(outs: &[StreamOut]) -> String {
        outs.iter()
            .filter_map(|out| match out {
                StreamOut::Frame(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn deltas_become_chat_chunks_then_done() {
        let mut stream = ResponsesToChatStream::new("gpt-5.1".to_string());
        let mut outs = Vec::new();
        outs.extend(stream.on_event(&event(
            r#"{"type":"response.created","response":{"id":"resp_1","created_at":7}}"#,
        )));
        outs.extend(stream.on_event(&event(
            r#"{"type":"response.output_text.delta","output_index":0,"delta":"He"}"#,
        )));
        outs.extend(stream.on_event(&event(
            r#"{"type":"response.output_text.delta","output_index":0,"delta":"llo"}"#,
        )));
        outs.extend(stream.on_event(&event(
            r#"{"type":"response.completed","response":{"usage":{"input_tokens":1,"output_tokens":2}}}"#,
        )));
        outs.extend(stream.on_event(&event(r#"{"type":"response.done"}"#)));

        let text = frames_to_text(&outs);
        assert!(text.contains(r#""content":"He""#));
        assert!(text.contains(r#""content":"llo""#));
        assert!(text.contains(r#""finish_reason":"stop""#));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert!(matches!(outs.last(), Some(StreamOut::Done)));
    }

    #[test]
    fn error_event_classifies() {
        let mut stream = ResponsesToChatStream::new("gpt-5.1".to_string());
        let outs = stream.on_event(&event(
            r#"{"type":"response.error","error":{"message":"too many requests"}}"#,
        ));
        assert!(matches!(
            outs.first(),
            Some(StreamOut::Error(err)) if err.status.as_u16() == 429
        ));
    }

    #[test]
    fn eof_without_terminator_still_finishes() {
        let mut stream = ResponsesToChatStream::new("gpt-5.1".to_string());
        stream.on_event(&event(
            r#"{"type":"response.output_text.delta","delta":"x"}"#,
        ));
        let outs = stream.finish();
        let text = frames_to_text(&outs);
        assert!(text.contains("[DONE]"));
    }
}
