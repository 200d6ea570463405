use routecodex_protocol::openai::chat::ChatCompletionChunk;
use routecodex_protocol::sse::{SseEvent, encode_sse};
use routecodex_protocol::usage::Usage;
use serde_json::{Value as JsonValue, json};

use crate::error::classify_sse_error;
use crate::{StreamOut, StreamTransformer};

/// Maps an upstream chat-completions SSE stream onto Responses events.
///
/// The emitted order is fixed: `response.created`, `response.in_progress`,
/// deltas, `response.output_text.done`, `response.completed`,
/// `response.done`. Nothing is emitted after `response.done`.
pub struct ChatToResponsesStream {
    id: String,
    model: String,
    created: i64,
    started: bool,
    text: String,
    tool_started: bool,
    usage: Option<Usage>,
    done: bool,
}

impl ChatToResponsesStream {
    pub fn new(model: String) -> Self {
        Self {
            id: "resp_stream".to_string(),
            model,
            created: 0,
            started: false,
            text: String::new(),
            tool_started: false,
            usage: None,
            done: false,
        }
    }

    fn frame(&self, name: &str, data: JsonValue) -> StreamOut {
        StreamOut::Frame(encode_sse(Some(name), &data.to_string()))
    }

    fn start_frames(&mut self) -> Vec<StreamOut> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let skeleton = json!({
            "id": self.id,
            "object": "response",
            "created_at": self.created,
            "model": self.model,
            "status": "in_progress",
        });
        vec![
            self.frame("response.created", json!({"type": "response.created", "response": skeleton})),
            self.frame(
                "response.in_progress",
                json!({"type": "response.in_progress", "response": skeleton}),
            ),
        ]
    }

    fn terminate(&mut self) -> Vec<StreamOut> {
        let mut out = self.start_frames();
        out.push(self.frame(
            "response.output_text.done",
            json!({
                "type": "response.output_text.done",
                "output_index": 0,
                "text": self.text,
            }),
        ));
        let usage = self
            .usage
            .map(|u| u.io_json())
            .unwrap_or_else(|| json!(null));
        out.push(self.frame(
            "response.completed",
            json!({
                "type": "response.completed",
                "response": {
                    "id": self.id,
                    "object": "response",
                    "created_at": self.created,
                    "model": self.model,
                    "status": "completed",
                    "output": [{
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": self.text, "annotations": []}]
                    }],
                    "usage": usage,
                }
            }),
        ));
        out.push(self.frame("response.done", json!({"type": "response.done"})));
        out.push(StreamOut::Done);
        self.done = true;
        out
    }
}

impl StreamTransformer for ChatToResponsesStream {
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
        if !self.started {
            if !chunk.id.is_empty() {
                self.id = format!("resp_{}", chunk.id.trim_start_matches("chatcmpl-"));
            }
            self.created = chunk.created;
            out.extend(self.start_frames());
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.normalized());
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.text.push_str(content);
                    out.push(self.frame(
                        "response.output_text.delta",
                        json!({
                            "type": "response.output_text.delta",
                            "output_index": 0,
                            "delta": content,
                        }),
                    ));
                }
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    if let Some(id) = &call.id {
                        self.tool_started = true;
                        out.push(self.frame(
                            "response.output_item.added",
                            json!({
                                "type": "response.output_item.added",
                                "output_index": call.index + 1,
                                "item": {
                                    "type": "function_call",
                                    "call_id": id,
                                    "name": call.function.as_ref().and_then(|f| f.name.clone()),
                                    "arguments": "",
                                }
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
                            "response.function_call_arguments.delta",
                            json!({
                                "type": "response.function_call_arguments.delta",
                                "output_index": call.index + 1,
                                "delta": arguments,
                            }),
                        ));
                    }
                }
            }
            if choice.finish_reason.is_some() && !self.done {
                out.extend(self.terminate());
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

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    fn names(outs: &[StreamOut]) -> Vec<String> {
        outs.iter()
            .filter_map(|out| match out {
                StreamOut::Frame(bytes) => {
                    let text = String::from_utf8_lossy(bytes);
                    text.lines()
                        .find(|line| line.starts_with("event: "))
                        .map(|line| line.trim_start_matches("event: ").to_string())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn emits_mandatory_event_order() {
        let mut stream = ChatToResponsesStream::new("gpt-5.1".to_string());
        let mut outs = Vec::new();
        outs.extend(stream.on_event(&event(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-5.1","choices":[{"index":0,"delta":{"role":"assistant","content":"He"}}]}"#,
        )));
        outs.extend(stream.on_event(&event(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-5.1","choices":[{"index":0,"delta":{"content":"llo"}}]}"#,
        )));
        outs.extend(stream.on_event(&event("[DONE]")));

        let names = names(&outs);
        let expect = [
            "response.created",
            "response.in_progress",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.output_text.done",
            "response.completed",
            "response.done",
        ];
        assert_eq!(names, expect);
        assert!(matches!(outs.last(), Some(StreamOut::Done)));
    }

    #[test]
    fn nothing_after_done() {
        let mut stream = ChatToResponsesStream::new("gpt-5.1".to_string());
        stream.on_event(&event("[DONE]"));
        assert!(stream.on_event(&event(r#"{"id":"x","choices":[]}"#)).is_empty());
        assert!(stream.finish().is_empty());
    }

    #[test]
    fn completed_carries_accumulated_text() {
        let mut stream = ChatToResponsesStream::new("gpt-5.1".to_string());
        stream.on_event(&event(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#,
        ));
        let outs = stream.finish();
        let text: String = outs
            .iter()
            .filter_map(|out| match out {
                StreamOut::Frame(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
                _ => None,
            })
            .collect();
        assert!(text.contains(r#""text":"Hi""#));
    }
}
