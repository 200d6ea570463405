use routecodex_common::{ErrorKind, GatewayError};
use serde_json::Value as JsonValue;

/// Classify an error event delivered inside an upstream SSE stream.
///
/// Rate-limit-like errors normalize to a retryable 429; context-length to a
/// fatal 400; everything else to a retryable 503 carrying the upstream code.
pub fn classify_sse_error(data: &JsonValue) -> GatewayError {
    let envelope = data.get("error").unwrap_or(data);
    let message = envelope
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("upstream stream error")
        .to_string();
    let code = envelope
        .get("code")
        .map(code_to_string)
        .or_else(|| envelope.get("type").and_then(|v| v.as_str()).map(String::from));
    let status = envelope
        .get("status")
        .and_then(|v| v.as_u64())
        .or_else(|| data.get("status").and_then(|v| v.as_u64()));

    let lowered = format!(
        "{} {}",
        message.to_ascii_lowercase(),
        code.as_deref().unwrap_or("").to_ascii_lowercase()
    );

    if is_context_length(&lowered) {
        let mut err = GatewayError::new(ErrorKind::ContextLengthExceeded, message);
        if let Some(code) = code {
            err = err.with_upstream_code(code);
        }
        return err;
    }

    if status == Some(429) || is_rate_limit(&lowered) {
        let mut err = GatewayError::rate_limited(message);
        if let Some(code) = code {
            err = err.with_upstream_code(code);
        }
        return err;
    }

    let mut err = GatewayError::new(ErrorKind::UpstreamSseError, message);
    if let Some(code) = code {
        err = err.with_upstream_code(code);
    }
    err
}

fn code_to_string(code: &JsonValue) -> String {
    match code {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_rate_limit(lowered: &str) -> bool {
    lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("too many requests")
        || lowered.contains("quota")
}

fn is_context_length(lowered: &str) -> bool {
    lowered.contains("context length")
        || lowered.contains("context_length")
        || lowered.contains("maximum context")
        || lowered.contains("context window")
}
