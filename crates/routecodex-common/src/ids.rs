use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Downstream request id, attached to every snapshot and response header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn from_header(value: &str) -> Self {
        Self(value.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time-ordered trace id used for log correlation across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProviderKeyParseError {
    #[error("provider key needs provider.model.alias, got {0:?}")]
    TooFewSegments(String),
    #[error("provider key has an empty segment: {0:?}")]
    EmptySegment(String),
}

/// `provider.model.alias` triple identifying one initialized upstream client.
///
/// Model ids may themselves contain dots (`openai.gpt-4.1.default`), so the
/// string form is split from both ends: the first segment is the provider,
/// the last is the alias, everything between is the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderKey {
    pub provider_id: String,
    pub model_id: String,
    pub key_alias: String,
}

impl ProviderKey {
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        key_alias: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            key_alias: key_alias.into(),
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.provider_id, self.model_id, self.key_alias)
    }
}

impl FromStr for ProviderKey {
    type Err = ProviderKeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let Some((provider_id, rest)) = raw.split_once('.') else {
            return Err(ProviderKeyParseError::TooFewSegments(raw.to_string()));
        };
        let Some((model_id, key_alias)) = rest.rsplit_once('.') else {
            return Err(ProviderKeyParseError::TooFewSegments(raw.to_string()));
        };
        if provider_id.is_empty() || model_id.is_empty() || key_alias.is_empty() {
            return Err(ProviderKeyParseError::EmptySegment(raw.to_string()));
        }
        Ok(Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            key_alias: key_alias.to_string(),
        })
    }
}

impl TryFrom<String> for ProviderKey {
    type Error = ProviderKeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKey> for String {
    fn from(value: ProviderKey) -> Self {
        value.to_string()
    }
}
