use async_trait::async_trait;
use routecodex_auth::AuthDescriptor;
use routecodex_common::GatewayError;
use serde_json::Value as JsonValue;

use crate::client::{ProviderClient, ProviderResponse};
use crate::config::{ProviderAuth, ProviderConfig};

use super::UpstreamHttp;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages upstream. API keys go in `x-api-key`, not
/// `Authorization`.
pub struct AnthropicProvider {
    http: UpstreamHttp,
    api_key: Option<String>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, auth: Option<AuthDescriptor>) -> Self {
        let api_key = match &config.auth {
            ProviderAuth::ApiKey { key } => Some(key.clone()),
            _ => None,
        };
        let mut config = config;
        if api_key.is_some() {
            // Moved into x-api-key below; keep the bearer path empty.
            config.auth = ProviderAuth::None;
        }
        Self {
            http: UpstreamHttp::new(config, auth),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
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

        let mut headers = vec![(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        )];
        if let Some(key) = &self.api_key {
            headers.push(("x-api-key".to_string(), key.clone()));
        }

        self.http
            .post_json(&self.http.config().endpoint, body, stream, &headers)
            .await
    }

    async fn cleanup(&self) {}
}
