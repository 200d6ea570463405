use routecodex_protocol::gemini::{GenerateContentResponse, Part};
use routecodex_protocol::openai::chat::{
    ChatCompletionChunk, ChatRole, ChunkChoice, ChunkDelta, FinishReason,
};
use routecodex_protocol::sse::{SseEvent, encode_openai_done, encode_sse};
use routecodex_protocol::usage::Usage;

use crate::error::classify_sse_error;
use crate::{StreamOut, StreamTransformer};

/// Maps a Gemini streamGenerateContent SSE stream (one
/// `GenerateContentResponse` per frame) onto chat-completions chunks.
pub struct GeminiToChatStream {
    model: String,
    role_emitted: bool,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl GeminiToChatStream {
    pub fn new(model: String) -> Self {
        Self {
            model,
            role_emitted: false,
            finish: None,
            usage: None,
            done: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>, usage: Option<Usage>) -> StreamOut {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-gemini".to_string(),
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

    fn terminate(&mut self) -> Vec<StreamOut> {
        let mut out = Vec::new();
        if !self.role_emitted {
            self.role_emitted = true;
            out.push(self.chunk(
                ChunkDelta {
                    role: Some(ChatRole::Assistant),
                    content: None,
                    tool_calls: None,
                },
                None,
                None,
            ));
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

impl StreamTransformer for GeminiToChatStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let data = event.data.trim();
        if data.is_empty() {
            return Vec::new();
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
            if value.get("error").is_some() {
                self.done = true;
                return vec![StreamOut::Error(classify_sse_error(&value))];
            }
        }

        let Ok(frame) = serde_json::from_str::<GenerateContentResponse>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.role_emitted {
            self.role_emitted = true;
            out.push(self.chunk(
                ChunkDelta {
                    role: Some(ChatRole::Assistant),
                    content: None,
                    tool_calls: None,
                },
                None,
                None,
            ));
        }
        if let Some(meta) = frame.usage_metadata {
            self.usage = Some(Usage {
                prompt_tokens: meta.prompt_token_count,
                completion_tokens: meta.candidates_token_count,
                total_tokens: meta.total_token_count,
            });
        }

        if let Some(candidate) = frame.candidates.first() {
            for part in &candidate.content.parts {
                if let Part::Text(text) = part {
                    if !text.is_empty() {
                        out.push(self.chunk(
                            ChunkDelta {
                                role: None,
                                content: Some(text.clone()),
                                tool_calls: None,
                            },
                            None,
                            None,
                        ));
                    }
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                self.finish = Some(match reason {
                    "MAX_TOKENS" => FinishReason::Length,
                    "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
                    _ => FinishReason::Stop,
                });
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
