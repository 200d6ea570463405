pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("token expired: {0}")]
    TokenExpired(String),
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
    #[error("interactive authorization required: {0}")]
    InteractiveRequired(String),
    #[error("interactive authorization already running: {0}")]
    InteractiveLocked(String),
    #[error("token portal unavailable: {0}")]
    PortalUnavailable(String),
    #[error("account verification required: {0}")]
    AccountVerificationRequired(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Io(err.to_string())
    }
}

impl AuthError {
    /// Whether the executor may rotate to another alias and retry.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExpired(_)
                | AuthError::RefreshFailed(_)
                | AuthError::InteractiveRequired(_)
                | AuthError::InteractiveLocked(_)
        )
    }
}
