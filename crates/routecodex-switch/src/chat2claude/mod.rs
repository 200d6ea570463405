mod request;
mod response;
mod stream;

pub use request::transform_request;
pub use response::transform_response;
pub use stream::ClaudeToChatStream;

use routecodex_common::GatewayError;
use routecodex_protocol::Dialect;
use serde_json::Value as JsonValue;

use crate::{DialectSwitch, StreamTransformer};

/// Inbound OpenAI Chat served by an Anthropic Messages upstream.
pub struct ChatToClaude;

impl DialectSwitch for ChatToClaude {
    fn inbound(&self) -> Dialect {
        Dialect::OpenaiChat
    }

    fn outbound(&self) -> Dialect {
        Dialect::AnthropicMessages
    }

    fn translate_request(&self, body: JsonValue) -> Result<JsonValue, GatewayError> {
        let request = serde_json::from_value(body)
            .map_err(|err| GatewayError::bad_request(format!("invalid chat request: {err}")))?;
        let out = transform_request(request);
        serde_json::to_value(out).map_err(|err| GatewayError::conversion(err.to_string()))
    }

    fn translate_response(
        &self,
        upstream: JsonValue,
        original: &JsonValue,
    ) -> Result<JsonValue, GatewayError> {
        let response = serde_json::from_value(upstream)
            .map_err(|err| GatewayError::conversion(format!("invalid messages body: {err}")))?;
        let out = transform_response(response, original);
        serde_json::to_value(out).map_err(|err| GatewayError::conversion(err.to_string()))
    }

    fn stream_transformer(&self, original: &JsonValue) -> Box<dyn StreamTransformer> {
        let model = original
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Box::new(ClaudeToChatStream::new(model))
    }
}
