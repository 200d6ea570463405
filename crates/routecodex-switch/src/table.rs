use std::collections::HashMap;
use std::sync::Arc;

use routecodex_common::GatewayError;
use routecodex_protocol::Dialect;
use routecodex_protocol::sse::{SseEvent, SseParser};
use serde_json::Value as JsonValue;

use crate::chat2claude::ChatToClaude;
use crate::chat2gemini::ChatToGemini;
use crate::chat2responses::ChatToResponses;
use crate::claude2chat::ClaudeToChat;
use crate::responses2chat::ResponsesToChat;
use crate::{DialectSwitch, StreamOut, StreamTransformer};

/// Dispatch table over (inbound dialect, outbound protocol), built once at
/// startup. Pairs without a direct module compose through the chat dialect.
pub struct SwitchTable {
    switches: HashMap<(Dialect, Dialect), Arc<dyn DialectSwitch>>,
}

impl Default for SwitchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchTable {
    pub fn new() -> Self {
        let mut switches: HashMap<(Dialect, Dialect), Arc<dyn DialectSwitch>> = HashMap::new();

        let chat2responses: Arc<dyn DialectSwitch> = Arc::new(ChatToResponses);
        let responses2chat: Arc<dyn DialectSwitch> = Arc::new(ResponsesToChat);
        let claude2chat: Arc<dyn DialectSwitch> = Arc::new(ClaudeToChat);
        let chat2claude: Arc<dyn DialectSwitch> = Arc::new(ChatToClaude);
        let chat2gemini: Arc<dyn DialectSwitch> = Arc::new(ChatToGemini);

        for dialect in [
            Dialect::OpenaiChat,
            Dialect::OpenaiResponses,
            Dialect::AnthropicMessages,
            Dialect::GeminiChat,
        ] {
            switches.insert((dialect, dialect), Arc::new(IdentitySwitch::new(dialect)));
        }

        switches.insert(
            (Dialect::OpenaiChat, Dialect::OpenaiResponses),
            chat2responses.clone(),
        );
        switches.insert(
            (Dialect::OpenaiResponses, Dialect::OpenaiChat),
            responses2chat.clone(),
        );
        switches.insert(
            (Dialect::AnthropicMessages, Dialect::OpenaiChat),
            claude2chat.clone(),
        );
        switches.insert(
            (Dialect::OpenaiChat, Dialect::AnthropicMessages),
            chat2claude.clone(),
        );
        switches.insert(
            (Dialect::OpenaiChat, Dialect::GeminiChat),
            chat2gemini.clone(),
        );

        // Composed hops through the chat dialect.
        switches.insert(
            (Dialect::AnthropicMessages, Dialect::OpenaiResponses),
            Arc::new(ComposedSwitch::new(claude2chat.clone(), chat2responses.clone())),
        );
        switches.insert(
            (Dialect::AnthropicMessages, Dialect::GeminiChat),
            Arc::new(ComposedSwitch::new(claude2chat.clone(), chat2gemini.clone())),
        );
        switches.insert(
            (Dialect::OpenaiResponses, Dialect::AnthropicMessages),
            Arc::new(ComposedSwitch::new(responses2chat.clone(), chat2claude.clone())),
        );
        switches.insert(
            (Dialect::OpenaiResponses, Dialect::GeminiChat),
            Arc::new(ComposedSwitch::new(responses2chat.clone(), chat2gemini.clone())),
        );

        Self { switches }
    }

    pub fn get(&self, inbound: Dialect, outbound: Dialect) -> Option<Arc<dyn DialectSwitch>> {
        self.switches.get(&(inbound, outbound)).cloned()
    }
}

/// Passthrough for equal inbound/outbound dialects.
pub struct IdentitySwitch {
    dialect: Dialect,
}

impl IdentitySwitch {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl DialectSwitch for IdentitySwitch {
    fn inbound(&self) -> Dialect {
        self.dialect
    }

    fn outbound(&self) -> Dialect {
        self.dialect
    }

    fn translate_request(&self, body: JsonValue) -> Result<JsonValue, GatewayError> {
        Ok(body)
    }

    fn translate_response(
        &self,
        upstream: JsonValue,
        _original: &JsonValue,
    ) -> Result<JsonValue, GatewayError> {
        Ok(upstream)
    }

    fn stream_transformer(&self, _original: &JsonValue) -> Box<dyn StreamTransformer> {
        Box::new(PassthroughStream::new(self.dialect))
    }
}

/// Re-encodes upstream events verbatim, tracking the dialect terminator so
/// the pipe still learns when the stream is complete.
struct PassthroughStream {
    dialect: Dialect,
    done: bool,
}

impl PassthroughStream {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            done: false,
        }
    }

    fn is_terminator(&self, event: &SseEvent) -> bool {
        match self.dialect {
            Dialect::OpenaiChat => event.data.trim() == "[DONE]",
            Dialect::OpenaiResponses => {
                event.event.as_deref() == Some("response.done")
                    || event.data.contains("\"response.done\"")
            }
            Dialect::AnthropicMessages => {
                event.event.as_deref() == Some("message_stop")
                    || event.data.contains("\"message_stop\"")
            }
            Dialect::GeminiChat => false,
        }
    }
}

impl StreamTransformer for PassthroughStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let frame = routecodex_protocol::sse::encode_sse(event.event.as_deref(), &event.data);
        let mut out = vec![StreamOut::Frame(frame)];
        if self.is_terminator(event) {
            self.done = true;
            out.push(StreamOut::Done);
        }
        out
    }

    fn finish(&mut self) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![StreamOut::Done]
    }
}

/// Two-hop switch: inbound -> chat -> outbound. Stream events run through
/// the outer transformer first (outbound -> chat frames), then each chat
/// frame re-parses into the inner transformer (chat -> inbound frames).
pub struct ComposedSwitch {
    inbound_leg: Arc<dyn DialectSwitch>,
    outbound_leg: Arc<dyn DialectSwitch>,
}

impl ComposedSwitch {
    pub fn new(inbound_leg: Arc<dyn DialectSwitch>, outbound_leg: Arc<dyn DialectSwitch>) -> Self {
        Self {
            inbound_leg,
            outbound_leg,
        }
    }
}

impl DialectSwitch for ComposedSwitch {
    fn inbound(&self) -> Dialect {
        self.inbound_leg.inbound()
    }

    fn outbound(&self) -> Dialect {
        self.outbound_leg.outbound()
    }

    fn translate_request(&self, body: JsonValue) -> Result<JsonValue, GatewayError> {
        let chat = self.inbound_leg.translate_request(body)?;
        self.outbound_leg.translate_request(chat)
    }

    fn translate_response(
        &self,
        upstream: JsonValue,
        original: &JsonValue,
    ) -> Result<JsonValue, GatewayError> {
        let chat = self.outbound_leg.translate_response(upstream, original)?;
        self.inbound_leg.translate_response(chat, original)
    }

    fn stream_transformer(&self, original: &JsonValue) -> Box<dyn StreamTransformer> {
        Box::new(ComposedStream {
            outer: self.outbound_leg.stream_transformer(original),
            inner: self.inbound_leg.stream_transformer(original),
            reparse: SseParser::new(),
            done: false,
        })
    }
}

struct ComposedStream {
    outer: Box<dyn StreamTransformer>,
    inner: Box<dyn StreamTransformer>,
    reparse: SseParser,
    done: bool,
}

impl ComposedStream {
    fn feed_inner(&mut self, outs: Vec<StreamOut>) -> Vec<StreamOut> {
        let mut result = Vec::new();
        for out in outs {
            match out {
                StreamOut::Frame(bytes) => {
                    for event in self.reparse.push_bytes(&bytes) {
                        result.extend(self.inner.on_event(&event));
                    }
                }
                StreamOut::Done => {
                    for event in self.reparse.finish() {
                        result.extend(self.inner.on_event(&event));
                    }
                    result.extend(self.inner.finish());
                    self.done = true;
                }
                StreamOut::Error(err) => {
                    self.done = true;
                    result.push(StreamOut::Error(err));
                }
            }
        }
        result
    }
}

impl StreamTransformer for ComposedStream {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let outs = self.outer.on_event(event);
        self.feed_inner(outs)
    }

    fn finish(&mut self) -> Vec<StreamOut> {
        if self.done {
            return Vec::new();
        }
        let outs = self.outer.finish();
        self.feed_inner(outs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_inbound_outbound_pair() {
        let table = SwitchTable::new();
        let dialects = [
            Dialect::OpenaiChat,
            Dialect::OpenaiResponses,
            Dialect::AnthropicMessages,
        ];
        let outbounds = [
            Dialect::OpenaiChat,
            Dialect::OpenaiResponses,
            Dialect::AnthropicMessages,
            Dialect::GeminiChat,
        ];
        for inbound in dialects {
            for outbound in outbounds {
                assert!(
                    table.get(inbound, outbound).is_some(),
                    "missing switch for {inbound:?} -> {outbound:?}"
                );
            }
        }
    }

    #[test]
    fn composed_claude_to_gemini_request() {
        let table = SwitchTable::new();
        let switch = table
            .get(Dialect::AnthropicMessages, Dialect::GeminiChat)
            .unwrap();
        let body = serde_json::json!({
            "model": "claude-3",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}]
        });
        let out = switch.translate_request(body).unwrap();
        assert_eq!(out.pointer("/contents/0/parts/0/text").unwrap(), "Hi");
    }

    #[test]
    fn composed_stream_maps_claude_through_chat() {
        let table = SwitchTable::new();
        let switch = table
            .get(Dialect::AnthropicMessages, Dialect::OpenaiResponses)
            .unwrap();
        let mut transformer = switch.stream_transformer(&serde_json::json!({"model": "claude-3"}));

        let mut outs = Vec::new();
        outs.extend(transformer.on_event(&SseEvent {
            event: None,
            data: r#"{"type":"response.created","response":{"id":"resp_1","created_at":1}}"#
                .to_string(),
        }));
        outs.extend(transformer.on_event(&SseEvent {
            event: None,
            data: r#"{"type":"response.output_text.delta","output_index":0,"delta":"Hi"}"#
                .to_string(),
        }));
        outs.extend(transformer.on_event(&SseEvent {
            event: None,
            data: r#"{"type":"response.completed","response":{}}"#.to_string(),
        }));
        outs.extend(transformer.on_event(&SseEvent {
            event: None,
            data: r#"{"type":"response.done"}"#.to_string(),
        }));

        let text: String = outs
            .iter()
            .filter_map(|out| match out {
                StreamOut::Frame(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
                _ => None,
            })
            .collect();
        assert!(text.contains("message_start"));
        assert!(text.contains(r#""text":"Hi""#));
        assert!(text.contains("message_stop"));
    }

    #[test]
    fn identity_passthrough_tracks_done() {
        let table = SwitchTable::new();
        let switch = table.get(Dialect::OpenaiChat, Dialect::OpenaiChat).unwrap();
        let mut transformer = switch.stream_transformer(&serde_json::json!({}));
        let outs = transformer.on_event(&SseEvent {
            event: None,
            data: "[DONE]".to_string(),
        });
        assert!(matches!(outs.last(), Some(StreamOut::Done)));
    }
}
