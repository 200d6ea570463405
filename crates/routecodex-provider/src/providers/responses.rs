use async_trait::async_trait;
use routecodex_auth::AuthDescriptor;
use routecodex_common::GatewayError;
use routecodex_protocol::sse::SseParser;
use serde_json::Value as JsonValue;

use crate::client::{ProviderClient, ProviderData, ProviderResponse};
use crate::config::ProviderConfig;
use crate::sse2json::ResponsesAccumulator;

use super::UpstreamHttp;

/// OpenAI Responses upstream. Always streams (`Accept: text/event-stream`);
/// for non-stream callers the SSE is decoded into the final JSON here.
pub struct ResponsesProvider {
    http: UpstreamHttp,
}

impl ResponsesProvider {
    pub fn new(config: ProviderConfig, auth: Option<AuthDescriptor>) -> Self {
        Self {
            http: UpstreamHttp::new(config, auth),
        }
    }
}

#[async_trait]
impl ProviderClient for ResponsesProvider {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn send_request(
        &self,
        payload: JsonValue,
        stream: bool,
    ) -> Result<ProviderResponse, GatewayError> {
        let mut payload = payload;
        if let Some(object) = payload.as_object_mut() {
            object.insert("stream".to_string(), JsonValue::Bool(true));
        }
        let body = serde_json::to_vec(&payload)
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        let response = self
            .http
            .post_json(&self.http.config().endpoint, body, true, &[])
            .await?;

        if stream {
            return Ok(response);
        }

        // Non-stream caller: drain the SSE into the completed response.
        match response.data {
            ProviderData::Stream(mut bytes) => {
                use futures_util::StreamExt;
                let mut parser = SseParser::new();
                let mut accumulator = ResponsesAccumulator::new();
                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk?;
                    for event in parser.push_bytes(&chunk) {
                        accumulator.push(&event);
                    }
                }
                for event in parser.finish() {
                    accumulator.push(&event);
                }
                Ok(ProviderResponse {
                    data: ProviderData::Json(accumulator.finish()?),
                    status: response.status,
                    headers: response.headers,
                })
            }
            ProviderData::Json(value) => Ok(ProviderResponse {
                data: ProviderData::Json(value),
                status: response.status,
                headers: response.headers,
            }),
        }
    }

    async fn cleanup(&self) {}
}
