use async_trait::async_trait;
use routecodex_auth::AuthDescriptor;
use routecodex_common::GatewayError;
use serde_json::Value as JsonValue;

use crate::client::{ProviderClient, ProviderResponse};
use crate::config::ProviderConfig;

use super::UpstreamHttp;

/// OpenAI-compatible chat completions upstream. Also serves qwen, iflow and
/// glm, whose endpoints speak this dialect.
pub struct OpenAiProvider {
    http: UpstreamHttp,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, auth: Option<AuthDescriptor>) -> Self {
        Self {
            http: UpstreamHttp::new(config, auth),
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
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
            object.insert("stream".to_string(), JsonValue::Bool(stream));
        }
        let body = serde_json::to_vec(&payload)
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        self.http
            .post_json(&self.http.config().endpoint, body, stream, &[])
            .await
    }

    async fn cleanup(&self) {}
}
