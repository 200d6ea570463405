pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;
pub mod usage;

use serde::{Deserialize, Serialize};

/// The four LLM API shapes supported at ingress and egress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    OpenaiChat,
    OpenaiResponses,
    AnthropicMessages,
    GeminiChat,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenaiChat => "openai-chat",
            Dialect::OpenaiResponses => "openai-responses",
            Dialect::AnthropicMessages => "anthropic-messages",
            Dialect::GeminiChat => "gemini-chat",
        }
    }
}
