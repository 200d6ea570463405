use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-provider OAuth endpoints and client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthFlowConfig {
    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub device_code_url: Option<String>,
    pub user_info_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub supports_pkce: bool,
    #[serde(default)]
    pub supports_device_code: bool,
    #[serde(default)]
    pub supports_api_key_exchange: bool,
    /// Optional portal that mints tokens without a browser round-trip.
    pub token_portal_url: Option<String>,
}

/// Auth half of a provider config: what kind of credential backs it and
/// where the token lives.
#[derive(Debug, Clone)]
pub struct AuthDescriptor {
    pub auth_type: AuthType,
    pub token_file: PathBuf,
    /// Alias the token file was resolved from; `static` short-circuits all
    /// refresh and interactive behavior.
    pub alias: String,
    pub flow: OAuthFlowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    ApiKey,
    OAuth,
}

/// Options for one ensure-valid call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureOptions {
    /// Fall through to the interactive flow when a refresh grant fails.
    pub force_reacquire_if_refresh_fails: bool,
    /// Allow opening a browser; false on the request hot path.
    pub open_browser: bool,
    /// Skip validity checks and the success throttle entirely.
    pub force_reauthorize: bool,
}
