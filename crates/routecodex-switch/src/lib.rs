pub mod chat2claude;
pub mod chat2gemini;
pub mod chat2responses;
pub mod claude2chat;
pub mod content;
pub mod error;
pub mod responses2chat;
pub mod synth;

mod table;

pub use routecodex_protocol::Dialect;
pub use table::{ComposedSwitch, IdentitySwitch, SwitchTable};

use bytes::Bytes;
use routecodex_common::GatewayError;
use routecodex_protocol::sse::SseEvent;
use serde_json::Value as JsonValue;

/// One translated output of a stream transformer.
#[derive(Debug, Clone)]
pub enum StreamOut {
    /// Encoded SSE frame ready for the wire.
    Frame(Bytes),
    /// Terminal frame has been emitted; the pipe should stop.
    Done,
    /// Upstream surfaced an error inside the stream.
    Error(GatewayError),
}

/// Stateful per-request mapper from upstream SSE events to inbound-dialect
/// frames. Events must be fed in receipt order.
pub trait StreamTransformer: Send {
    fn on_event(&mut self, event: &SseEvent) -> Vec<StreamOut>;

    /// Flush at upstream EOF. Emits the inbound terminator if the upstream
    /// ended without one.
    fn finish(&mut self) -> Vec<StreamOut>;
}

/// Request/response/stream translation between one inbound dialect and one
/// outbound protocol. Implementations are stateless; per-request stream
/// state lives in the transformer they hand out.
pub trait DialectSwitch: Send + Sync {
    fn inbound(&self) -> Dialect;
    fn outbound(&self) -> Dialect;

    fn translate_request(&self, body: JsonValue) -> Result<JsonValue, GatewayError>;

    /// `original` is the untranslated inbound body, kept so response
    /// conversion can echo model names and request shape.
    fn translate_response(
        &self,
        upstream: JsonValue,
        original: &JsonValue,
    ) -> Result<JsonValue, GatewayError>;

    fn stream_transformer(&self, original: &JsonValue) -> Box<dyn StreamTransformer>;
}
