use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use routecodex_common::{GatewayError, Settings};
use routecodex_protocol::Dialect;
use routecodex_protocol::sse::{encode_openai_done, encode_sse};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::client::{ByteStream, ProviderClient, ProviderData, ProviderResponse};
use crate::config::ProviderConfig;

/// One canned exchange. Matched by `request_id` when the payload carries
/// one, otherwise by (dialect, model prefix, tag).
#[derive(Debug, Clone, Deserialize)]
pub struct MockFixture {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub dialect: Option<Dialect>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub response: Option<JsonValue>,
    /// Raw `data:` payloads to synthesize an SSE stream from.
    #[serde(default)]
    pub sse: Vec<JsonValue>,
}

fn default_status() -> u16 {
    200
}

/// Fixture-driven impersonator used by tests and local development.
pub struct MockProvider {
    config: ProviderConfig,
    samples_dir: Option<PathBuf>,
    validate_names: bool,
    fixtures: RwLock<Vec<MockFixture>>,
}

impl MockProvider {
    pub fn new(config: ProviderConfig, settings: &Settings) -> Self {
        Self {
            config,
            samples_dir: settings.mock_samples_dir.clone().map(PathBuf::from),
            validate_names: settings.mock_validate_names,
            fixtures: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, fixture: MockFixture) {
        self.fixtures.write().await.push(fixture);
    }

    async fn find(&self, payload: &JsonValue) -> Option<MockFixture> {
        let fixtures = self.fixtures.read().await;
        let request_id = payload.get("mock_request_id").and_then(|v| v.as_str());
        if let Some(request_id) = request_id {
            if let Some(fixture) = fixtures
                .iter()
                .find(|f| f.request_id.as_deref() == Some(request_id))
            {
                return Some(fixture.clone());
            }
        }

        let model = payload.get("model").and_then(|v| v.as_str()).unwrap_or("");
        let tag = payload.get("mock_tag").and_then(|v| v.as_str());
        let dialect = self
            .config
            .mock_dialect
            .unwrap_or(Dialect::OpenaiChat);

        fixtures
            .iter()
            .find(|f| {
                f.request_id.is_none()
                    && f.dialect.map(|d| d == dialect).unwrap_or(true)
                    && f.model
                        .as_deref()
                        .map(|m| model.starts_with(m))
                        .unwrap_or(true)
                    && f.tag.as_deref() == tag
            })
            .cloned()
    }

    fn validate(&self, payload: &JsonValue) -> Result<(), GatewayError> {
        if self.validate_names {
            validate_tool_names(payload)?;
        }
        validate_tool_results(payload)?;
        validate_apply_patch(payload)?;
        Ok(())
    }

    fn stream_from(&self, fixture: &MockFixture) -> ByteStream {
        let dialect = self.config.mock_dialect.unwrap_or(Dialect::OpenaiChat);
        let mut frames: Vec<Result<Bytes, GatewayError>> = fixture
            .sse
            .iter()
            .map(|value| {
                let name = value.get("type").and_then(|v| v.as_str());
                let named = !matches!(dialect, Dialect::OpenaiChat);
                Ok(encode_sse(
                    if named { name } else { None },
                    &value.to_string(),
                ))
            })
            .collect();
        if dialect == Dialect::OpenaiChat {
            frames.push(Ok(encode_openai_done()));
        }
        Box::pin(futures_util::stream::iter(frames))
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    /// Loads `*.json` fixtures from the samples directory.
    async fn initialize(&self) -> Result<(), GatewayError> {
        let Some(dir) = &self.samples_dir else {
            return Ok(());
        };
        let mut loaded = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|err| GatewayError::internal(format!("mock samples dir: {err}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path)
                .map_err(|err| GatewayError::internal(err.to_string()))?;
            match serde_json::from_slice::<MockFixture>(&bytes) {
                Ok(fixture) => loaded.push(fixture),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping bad mock fixture");
                }
            }
        }
        self.fixtures.write().await.extend(loaded);
        Ok(())
    }

    async fn send_request(
        &self,
        payload: JsonValue,
        stream: bool,
    ) -> Result<ProviderResponse, GatewayError> {
        self.validate(&payload)?;

        let fixture = self.find(&payload).await.ok_or_else(|| {
            GatewayError::no_target(format!(
                "no mock fixture matches model {:?}",
                payload.get("model")
            ))
        })?;

        if !(200..300).contains(&fixture.status) {
            let body = fixture
                .response
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            return Err(crate::client::classify_http_error(fixture.status, &body));
        }

        if stream && !fixture.sse.is_empty() {
            return Ok(ProviderResponse {
                data: ProviderData::Stream(self.stream_from(&fixture)),
                status: 200,
                headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
            });
        }

        let body = fixture.response.clone().ok_or_else(|| {
            GatewayError::internal("mock fixture has neither response nor sse".to_string())
        })?;
        Ok(ProviderResponse::json(body))
    }

    async fn cleanup(&self) {
        self.fixtures.write().await.clear();
    }
}

fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_tool_names(payload: &JsonValue) -> Result<(), GatewayError> {
    let Some(tools) = payload.get("tools").and_then(|v| v.as_array()) else {
        return Ok(());
    };
    for tool in tools {
        let name = tool
            .pointer("/function/name")
            .or_else(|| tool.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !valid_tool_name(name) {
            return Err(GatewayError::bad_request(format!(
                "tool name {name:?} violates [a-zA-Z0-9_-]+"
            )));
        }
    }
    Ok(())
}

/// Tool-result entries must carry an output and reference a known call id.
fn validate_tool_results(payload: &JsonValue) -> Result<(), GatewayError> {
    let Some(messages) = payload.get("messages").and_then(|v| v.as_array()) else {
        return Ok(());
    };
    let mut known_call_ids: Vec<&str> = Vec::new();
    for message in messages {
        if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                    known_call_ids.push(id);
                }
            }
        }
        if message.get("role").and_then(|v| v.as_str()) == Some("tool") {
            if message
                .get("content")
                .map(|v| v.is_null())
                .unwrap_or(true)
            {
                return Err(GatewayError::bad_request(
                    "tool result entry is missing output".to_string(),
                ));
            }
            let call_id = message
                .get("tool_call_id")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !known_call_ids.contains(&call_id) {
                return Err(GatewayError::bad_request(format!(
                    "tool result references unknown call_id {call_id:?}"
                )));
            }
        }
    }
    Ok(())
}

/// The apply_patch tool must declare an object schema with an `input`
/// property, the shape editors rely on.
fn validate_apply_patch(payload: &JsonValue) -> Result<(), GatewayError> {
    let Some(tools) = payload.get("tools").and_then(|v| v.as_array()) else {
        return Ok(());
    };
    for tool in tools {
        let name = tool
            .pointer("/function/name")
            .or_else(|| tool.get("name"))
            .and_then(|v| v.as_str());
        if name != Some("apply_patch") {
            continue;
        }
        let parameters = tool
            .pointer("/function/parameters")
            .or_else(|| tool.get("parameters"));
        let ok = parameters
            .and_then(|p| p.get("properties"))
            .map(|props| props.get("input").is_some() || props.get("patch").is_some())
            .unwrap_or(false);
        if !ok {
            return Err(GatewayError::bad_request(
                "apply_patch tool schema must declare an input property".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderAuth;
    use serde_json::json;

    fn mock(settings: Settings) -> MockProvider {
        MockProvider::new(
            ProviderConfig {
                provider_id: "mock".to_string(),
                provider_type: crate::config::ProviderType::Mock,
                endpoint: String::new(),
                headers: Vec::new(),
                auth: ProviderAuth::None,
                mock_dialect: Some(Dialect::OpenaiChat),
                proxy: None,
                oauth: None,
            },
            &settings,
        )
    }

    #[tokio::test]
    async fn matches_by_request_id_first() {
        let provider = mock(Settings::default());
        provider
            .register(MockFixture {
                request_id: Some("req_1".to_string()),
                dialect: None,
                model: None,
                tag: None,
                status: 200,
                response: Some(json!({"by": "id"})),
                sse: Vec::new(),
            })
            .await;
        provider
            .register(MockFixture {
                request_id: None,
                dialect: Some(Dialect::OpenaiChat),
                model: Some("gpt".to_string()),
                tag: None,
                status: 200,
                response: Some(json!({"by": "model"})),
                sse: Vec::new(),
            })
            .await;

        let response = provider
            .send_request(json!({"model": "gpt-x", "mock_request_id": "req_1"}), false)
            .await
            .unwrap();
        match response.data {
            ProviderData::Json(value) => assert_eq!(value["by"], "id"),
            _ => panic!("expected json"),
        }

        let response = provider
            .send_request(json!({"model": "gpt-x"}), false)
            .await
            .unwrap();
        match response.data {
            ProviderData::Json(value) => assert_eq!(value["by"], "model"),
            _ => panic!("expected json"),
        }
    }

    #[tokio::test]
    async fn name_validation_is_opt_in() {
        let bad_payload = json!({
            "model": "gpt-x",
            "messages": [],
            "tools": [{"type": "function", "function": {"name": "bad name!"}}]
        });

        let lenient = mock(Settings::default());
        lenient
            .register(MockFixture {
                request_id: None,
                dialect: None,
                model: None,
                tag: None,
                status: 200,
                response: Some(json!({})),
                sse: Vec::new(),
            })
            .await;
        assert!(lenient.send_request(bad_payload.clone(), false).await.is_ok());

        let strict = mock(Settings {
            mock_validate_names: true,
            ..Settings::default()
        });
        let err = strict.send_request(bad_payload, false).await.unwrap_err();
        assert_eq!(err.status.as_u16(), 400);
    }

    #[tokio::test]
    async fn tool_result_requires_known_call_id_and_output() {
        let provider = mock(Settings::default());
        let err = provider
            .send_request(
                json!({
                    "model": "gpt-x",
                    "messages": [
                        {"role": "tool", "tool_call_id": "ghost", "content": "7"}
                    ]
                }),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown call_id"));

        let err = provider
            .send_request(
                json!({
                    "model": "gpt-x",
                    "messages": [
                        {"role": "assistant", "tool_calls": [{"id": "c1", "type": "function",
                            "function": {"name": "f", "arguments": "{}"}}]},
                        {"role": "tool", "tool_call_id": "c1", "content": null}
                    ]
                }),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("missing output"));
    }

    #[tokio::test]
    async fn apply_patch_schema_is_checked() {
        let provider = mock(Settings::default());
        let err = provider
            .send_request(
                json!({
                    "model": "gpt-x",
                    "messages": [],
                    "tools": [{"type": "function", "function": {
                        "name": "apply_patch",
                        "parameters": {"type": "object", "properties": {"wrong": {}}}
                    }}]
                }),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("apply_patch"));
    }

    #[tokio::test]
    async fn stream_fixture_synthesizes_sse() {
        use futures_util::StreamExt;
        let provider = mock(Settings::default());
        provider
            .register(MockFixture {
                request_id: None,
                dialect: None,
                model: None,
                tag: None,
                status: 200,
                response: None,
                sse: vec![json!({"choices": [{"index": 0, "delta": {"content": "Hi"}}]})],
            })
            .await;
        let response = provider
            .send_request(json!({"model": "gpt-x"}), true)
            .await
            .unwrap();
        let ProviderData::Stream(mut stream) = response.data else {
            panic!("expected stream");
        };
        let mut all = Vec::new();
        while let Some(chunk) = stream.next().await {
            all.extend_from_slice(&chunk.unwrap());
        }
        let text = String::from_utf8(all).unwrap();
        assert!(text.contains(r#""content":"Hi""#));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }
}
