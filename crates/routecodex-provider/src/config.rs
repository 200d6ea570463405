use serde::{Deserialize, Serialize};

use routecodex_protocol::Dialect;

/// Upstream provider families the gateway can speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Openai,
    Responses,
    Anthropic,
    Gemini,
    GeminiCli,
    Antigravity,
    Iflow,
    Qwen,
    Glm,
    Mock,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Openai => "openai",
            ProviderType::Responses => "responses",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Gemini => "gemini",
            ProviderType::GeminiCli => "gemini-cli",
            ProviderType::Antigravity => "antigravity",
            ProviderType::Iflow => "iflow",
            ProviderType::Qwen => "qwen",
            ProviderType::Glm => "glm",
            ProviderType::Mock => "mock",
        }
    }

    /// Wire dialect the provider speaks. Qwen/iFlow/GLM expose
    /// OpenAI-compatible chat endpoints.
    pub fn outbound_protocol(&self) -> Dialect {
        match self {
            ProviderType::Openai
            | ProviderType::Iflow
            | ProviderType::Qwen
            | ProviderType::Glm
            | ProviderType::Mock => Dialect::OpenaiChat,
            ProviderType::Responses => Dialect::OpenaiResponses,
            ProviderType::Anthropic => Dialect::AnthropicMessages,
            ProviderType::Gemini | ProviderType::GeminiCli | ProviderType::Antigravity => {
                Dialect::GeminiChat
            }
        }
    }

    pub fn uses_oauth(&self) -> bool {
        matches!(
            self,
            ProviderType::GeminiCli
                | ProviderType::Antigravity
                | ProviderType::Iflow
                | ProviderType::Qwen
        )
    }

    /// Per-provider retry ceiling; antigravity tolerates more because
    /// account-verification bounces look like transient failures.
    pub fn max_attempts(&self) -> u32 {
        match self {
            ProviderType::Antigravity => 5,
            _ => 3,
        }
    }
}

/// How a provider's requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderAuth {
    None,
    ApiKey { key: String },
    OAuth { alias: String },
}

impl Default for ProviderAuth {
    fn default() -> Self {
        ProviderAuth::None
    }
}

/// Static description of one upstream provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub endpoint: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub auth: ProviderAuth,
    /// Mock provider only: dialect the fixtures are written in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_dialect: Option<Dialect>,
    /// Outbound proxy override for this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// OAuth endpoints for providers whose auth is an alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<routecodex_auth::OAuthFlowConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_protocols() {
        assert_eq!(ProviderType::Openai.outbound_protocol(), Dialect::OpenaiChat);
        assert_eq!(
            ProviderType::Responses.outbound_protocol(),
            Dialect::OpenaiResponses
        );
        assert_eq!(
            ProviderType::GeminiCli.outbound_protocol(),
            Dialect::GeminiChat
        );
        assert_eq!(ProviderType::Qwen.outbound_protocol(), Dialect::OpenaiChat);
    }

    #[test]
    fn antigravity_gets_more_attempts() {
        assert_eq!(ProviderType::Antigravity.max_attempts(), 5);
        assert_eq!(ProviderType::Openai.max_attempts(), 3);
    }

    #[test]
    fn provider_type_round_trips_kebab_case() {
        let parsed: ProviderType = serde_json::from_str("\"gemini-cli\"").unwrap();
        assert_eq!(parsed, ProviderType::GeminiCli);
    }
}
