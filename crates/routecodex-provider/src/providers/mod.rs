pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod responses;

use bytes::Bytes;
use futures_util::StreamExt;
use routecodex_common::GatewayError;
use routecodex_auth::{AuthDescriptor, StoredToken, TokenStore};

use crate::client::{ByteStream, ProviderData, ProviderResponse, classify_http_error};
use crate::config::{ProviderAuth, ProviderConfig};
use crate::http::shared_client;

/// Shared HTTP plumbing for the concrete provider clients.
pub(crate) struct UpstreamHttp {
    config: ProviderConfig,
    store: TokenStore,
    auth: Option<AuthDescriptor>,
}

impl UpstreamHttp {
    pub(crate) fn new(config: ProviderConfig, auth: Option<AuthDescriptor>) -> Self {
        Self {
            config,
            store: TokenStore::new(),
            auth,
        }
    }

    pub(crate) fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn current_token(&self) -> Option<StoredToken> {
        let auth = self.auth.as_ref()?;
        self.store.load(&auth.token_file)
    }

    /// `Authorization` value for the next call. OAuth secrets are re-read
    /// from disk every time so a background refresh is picked up.
    pub(crate) fn bearer(&self) -> Result<Option<String>, GatewayError> {
        match &self.config.auth {
            ProviderAuth::None => Ok(None),
            ProviderAuth::ApiKey { key } => Ok(Some(format!("Bearer {key}"))),
            ProviderAuth::OAuth { .. } => {
                let token = self.current_token().ok_or_else(|| {
                    GatewayError::invalid_token(format!(
                        "no credential on disk for {}",
                        self.config.provider_id
                    ))
                })?;
                let secret = token.effective_secret().ok_or_else(|| {
                    GatewayError::invalid_token(format!(
                        "credential for {} has no usable secret",
                        self.config.provider_id
                    ))
                })?;
                Ok(Some(format!("Bearer {secret}")))
            }
        }
    }

    pub(crate) async fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
        accept_sse: bool,
        extra_headers: &[(String, String)],
    ) -> Result<ProviderResponse, GatewayError> {
        let client = shared_client(self.config.proxy.as_deref())?;
        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        if accept_sse {
            request = request.header("Accept", "text/event-stream");
        }
        if let Some(authorization) = self.bearer()? {
            request = request.header("Authorization", authorization);
        }
        for (name, value) in self.config.headers.iter().chain(extra_headers) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|err| GatewayError::timeout(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<Vec<_>>();

        if !(200..300).contains(&status) {
            let body = response
                .bytes()
                .await
                .map(|b| String::from_utf8_lossy(&b).to_string())
                .unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let is_sse = headers
            .iter()
            .any(|(name, value)| {
                name.eq_ignore_ascii_case("content-type") && value.contains("text/event-stream")
            });

        if is_sse {
            let stream: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
                chunk
                    .map(Bytes::from)
                    .map_err(|err| GatewayError::timeout(err.to_string()))
            }));
            Ok(ProviderResponse {
                data: ProviderData::Stream(stream),
                status,
                headers,
            })
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|err| GatewayError::timeout(err.to_string()))?;
            let value = serde_json::from_slice(&bytes).map_err(|err| {
                GatewayError::internal(format!("upstream returned invalid json: {err}"))
            })?;
            Ok(ProviderResponse {
                data: ProviderData::Json(value),
                status,
                headers,
            })
        }
    }
}
