use serde::{Deserialize, Serialize};

/// Token accounting in either of the two spellings upstreams use.
///
/// OpenAI chat reports `prompt_tokens`/`completion_tokens`; Responses and
/// Anthropic report `input_tokens`/`output_tokens`. Deserialization accepts
/// both; serialization helpers pick one spelling per dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "input_tokens", default)]
    pub prompt_tokens: u64,
    #[serde(alias = "output_tokens", default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn normalized(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self
    }

    pub fn chat_json(&self) -> serde_json::Value {
        serde_json::json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "total_tokens": self.normalized().total_tokens,
        })
    }

    pub fn io_json(&self) -> serde_json::Value {
        serde_json::json!({
            "input_tokens": self.prompt_tokens,
            "output_tokens": self.completion_tokens,
            "total_tokens": self.normalized().total_tokens,
        })
    }
}

/// Pull a usage out of an arbitrary response value, trying both spellings.
pub fn usage_from_value(value: &serde_json::Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    let prompt = usage
        .get("prompt_tokens")
        .or_else(|| usage.get("input_tokens"))
        .and_then(|v| v.as_u64());
    let completion = usage
        .get("completion_tokens")
        .or_else(|| usage.get("output_tokens"))
        .and_then(|v| v.as_u64());
    match (prompt, completion) {
        (None, None) => None,
        (prompt, completion) => Some(Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0))),
    }
}
