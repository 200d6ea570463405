use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use http::StatusCode;
use routecodex_common::{ErrorKind, GatewayError};
use serde_json::Value as JsonValue;

pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send + 'static>>;

/// Body of an upstream response: parsed JSON or an opaque SSE byte stream.
pub enum ProviderData {
    Json(JsonValue),
    Stream(ByteStream),
}

impl std::fmt::Debug for ProviderData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderData::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ProviderData::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct ProviderResponse {
    pub data: ProviderData,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ProviderResponse {
    pub fn json(value: JsonValue) -> Self {
        Self {
            data: ProviderData::Json(value),
            status: 200,
            headers: Vec::new(),
        }
    }
}

/// Uniform upstream client, one per initialized ProviderKey.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn initialize(&self) -> Result<(), GatewayError>;

    /// `payload` is already in the provider's outbound dialect; `stream`
    /// asks for SSE when the dialect supports it.
    async fn send_request(
        &self,
        payload: JsonValue,
        stream: bool,
    ) -> Result<ProviderResponse, GatewayError>;

    async fn cleanup(&self);
}

/// Map an upstream HTTP error onto the gateway taxonomy.
pub fn classify_http_error(status: u16, body: &str) -> GatewayError {
    let lowered = body.to_ascii_lowercase();
    let message = summarize_body(body);

    let err = match status {
        400 if lowered.contains("context length") || lowered.contains("context_length") => {
            GatewayError::new(ErrorKind::ContextLengthExceeded, message)
        }
        400 => GatewayError::bad_request(message),
        401 => GatewayError::invalid_token(message),
        403 if lowered.contains("verification") => {
            GatewayError::new(ErrorKind::ForbiddenVerification, message)
        }
        403 if lowered.contains("service_disabled")
            || lowered.contains("has not been used in project") =>
        {
            GatewayError::new(ErrorKind::ServiceDisabled, message)
        }
        403 => GatewayError::new(ErrorKind::Forbidden, message),
        406 => GatewayError::invalid_token(message),
        429 => GatewayError::rate_limited(message),
        408 | 504 => GatewayError::timeout(message),
        500..=599 => GatewayError::new(ErrorKind::UpstreamSseError, message)
            .with_status(StatusCode::SERVICE_UNAVAILABLE),
        _ => GatewayError::internal(message),
    };

    match extract_upstream_code(body) {
        Some(code) => err.with_upstream_code(code),
        None => err,
    }
}

fn summarize_body(body: &str) -> String {
    let text = body.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(text) {
        if let Some(message) = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
        {
            return message.to_string();
        }
    }
    let mut out: String = text.chars().take(300).collect();
    if out.is_empty() {
        out = "upstream error".to_string();
    }
    out
}

fn extract_upstream_code(body: &str) -> Option<String> {
    let value = serde_json::from_str::<JsonValue>(body.trim()).ok()?;
    let code = value
        .pointer("/error/code")
        .or_else(|| value.pointer("/error/status"))
        .or_else(|| value.get("code"))?;
    Some(match code {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    })
}
