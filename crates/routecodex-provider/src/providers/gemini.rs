use async_trait::async_trait;
use routecodex_auth::AuthDescriptor;
use routecodex_common::GatewayError;
use serde_json::{Value as JsonValue, json};

use crate::client::{ProviderClient, ProviderResponse};
use crate::config::{ProviderAuth, ProviderConfig, ProviderType};

use super::UpstreamHttp;

/// Gemini generateContent upstream. The model lives in the URL, so each
/// client instance is bound to one model id. Covers the plain API, the
/// Cloud Code wrapper (gemini-cli) and antigravity.
pub struct GeminiProvider {
    http: UpstreamHttp,
    model_id: String,
    provider_type: ProviderType,
    api_key: Option<String>,
}

impl GeminiProvider {
    pub fn new(
        config: ProviderConfig,
        model_id: String,
        auth: Option<AuthDescriptor>,
    ) -> Self {
        let provider_type = config.provider_type;
        let api_key = match &config.auth {
            ProviderAuth::ApiKey { key } => Some(key.clone()),
            _ => None,
        };
        let mut config = config;
        if api_key.is_some() {
            // Plain Gemini auth is the x-goog-api-key header.
            config.auth = ProviderAuth::None;
        }
        Self {
            http: UpstreamHttp::new(config, auth),
            model_id,
            provider_type,
            api_key,
        }
    }

    fn url(&self, stream: bool) -> String {
        let base = self.http.config().endpoint.trim_end_matches('/');
        let action = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        match self.provider_type {
            // Cloud Code wraps the body and routes by method, not model.
            ProviderType::GeminiCli | ProviderType::Antigravity => {
                format!("{base}/v1internal:{action}")
            }
            _ => format!("{base}/{}:{action}", self.model_id),
        }
    }

    fn wrap_body(&self, payload: JsonValue) -> JsonValue {
        match self.provider_type {
            ProviderType::GeminiCli | ProviderType::Antigravity => {
                let project = self
                    .http
                    .current_token()
                    .and_then(|token| token.project_id);
                json!({
                    "model": self.model_id,
                    "project": project,
                    "request": payload,
                })
            }
            _ => payload,
        }
    }

    fn unwrap_body(&self, value: JsonValue) -> JsonValue {
        match self.provider_type {
            ProviderType::GeminiCli | ProviderType::Antigravity => value
                .get("response")
                .cloned()
                .unwrap_or(value),
            _ => value,
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiProvider {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn send_request(
        &self,
        payload: JsonValue,
        stream: bool,
    ) -> Result<ProviderResponse, GatewayError> {
        let body = serde_json::to_vec(&self.wrap_body(payload))
            .map_err(|err| GatewayError::internal(err.to_string()))?;

        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("x-goog-api-key".to_string(), key.clone()));
        }

        let response = self
            .http
            .post_json(&self.url(stream), body, stream, &headers)
            .await?;

        match response.data {
            crate::client::ProviderData::Json(value) => Ok(ProviderResponse {
                data: crate::client::ProviderData::Json(self.unwrap_body(value)),
                status: response.status,
                headers: response.headers,
            }),
            data => Ok(ProviderResponse {
                data,
                status: response.status,
                headers: response.headers,
            }),
        }
    }

    async fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider_type: ProviderType) -> ProviderConfig {
        ProviderConfig {
            provider_id: "g".to_string(),
            provider_type,
            endpoint: "https://example.test/v1beta/models".to_string(),
            headers: Vec::new(),
            auth: ProviderAuth::None,
            mock_dialect: None,
            proxy: None,
            oauth: None,
        }
    }

    #[test]
    fn plain_gemini_url_interpolates_model() {
        let provider = GeminiProvider::new(
            config(ProviderType::Gemini),
            "gemini-pro".to_string(),
            None,
        );
        assert_eq!(
            provider.url(false),
            "https://example.test/v1beta/models/gemini-pro:generateContent"
        );
        assert!(provider.url(true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn cloud_code_wraps_request_body() {
        let provider = GeminiProvider::new(
            config(ProviderType::GeminiCli),
            "gemini-pro".to_string(),
            None,
        );
        let wrapped = provider.wrap_body(json!({"contents": []}));
        assert_eq!(wrapped["model"], "gemini-pro");
        assert!(wrapped.get("request").is_some());
        let unwrapped = provider.unwrap_body(json!({"response": {"candidates": []}}));
        assert!(unwrapped.get("candidates").is_some());
    }
}
