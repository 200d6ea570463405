use http::StatusCode;
use serde_json::{Value as JsonValue, json};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure classes the pipeline distinguishes. The kind decides the HTTP
/// status, whether the executor may rotate to another pool member, and
/// whether OAuth repair is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    InvalidToken,
    ForbiddenVerification,
    Forbidden,
    RateLimited,
    ContextLengthExceeded,
    ServiceDisabled,
    UpstreamSseError,
    Timeout,
    NoTarget,
    InternalConversion,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::ForbiddenVerification => "account_verification_required",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContextLengthExceeded => "context_length_exceeded",
            ErrorKind::ServiceDisabled => "service_disabled",
            ErrorKind::UpstreamSseError => "upstream_sse_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NoTarget => "no_target",
            ErrorKind::InternalConversion => "conversion_failed",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn default_status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest | ErrorKind::ContextLengthExceeded => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorKind::ForbiddenVerification | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ServiceDisabled => StatusCode::FORBIDDEN,
            ErrorKind::UpstreamSseError | ErrorKind::NoTarget => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::InternalConversion | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidToken
                | ErrorKind::RateLimited
                | ErrorKind::UpstreamSseError
                | ErrorKind::Timeout
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: StatusCode,
    pub retryable: bool,
    /// Code carried inside an upstream error envelope, when one was present.
    pub upstream_code: Option<String>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.default_status(),
            retryable: kind.default_retryable(),
            upstream_code: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn no_target(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoTarget, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalConversion, message)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_upstream_code(mut self, code: impl Into<String>) -> Self {
        self.upstream_code = Some(code.into());
        self
    }

    /// Client-facing `{ "error": { message, type, code } }` body. 422s are
    /// client-origin by definition and say so; their code is the symbolic
    /// upstream code when one is set.
    pub fn error_body(&self) -> JsonValue {
        let code = match &self.upstream_code {
            Some(code) if self.status == StatusCode::UNPROCESSABLE_ENTITY => json!(code),
            _ => json!(self.status.as_u16()),
        };
        let mut error = json!({
            "message": self.message,
            "type": self.kind.code(),
            "code": code,
        });
        if let Some(code) = &self.upstream_code {
            if self.status != StatusCode::UNPROCESSABLE_ENTITY {
                error["upstream_code"] = json!(code);
            }
        }
        let mut body = json!({ "error": error });
        if self.status == StatusCode::UNPROCESSABLE_ENTITY {
            body["origin"] = json!("client");
        }
        body
    }
}
