use routecodex_common::GatewayError;
use routecodex_protocol::openai::responses::ResponsesStreamEvent;
use routecodex_protocol::sse::SseEvent;
use serde_json::{Value as JsonValue, json};

use crate::client::classify_http_error;

/// Accumulates a Responses SSE stream into the final response JSON.
///
/// `response.completed` carries the authoritative body; deltas are kept so
/// a stream that dies early still yields the text seen so far.
#[derive(Debug, Default)]
pub struct ResponsesAccumulator {
    created: Option<JsonValue>,
    completed: Option<JsonValue>,
    text: String,
    function_arguments: Vec<(u32, String)>,
    error: Option<GatewayError>,
}

impl ResponsesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &SseEvent) {
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let Ok(parsed) = serde_json::from_str::<ResponsesStreamEvent>(data) else {
            return;
        };
        match parsed {
            ResponsesStreamEvent::Created { response } => self.created = Some(response),
            ResponsesStreamEvent::Completed { response } => self.completed = Some(response),
            ResponsesStreamEvent::OutputTextDelta { delta, .. } => self.text.push_str(&delta),
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => match self
                .function_arguments
                .iter_mut()
                .find(|(index, _)| *index == output_index)
            {
                Some((_, arguments)) => arguments.push_str(&delta),
                None => self.function_arguments.push((output_index, delta)),
            },
            ResponsesStreamEvent::Error { error } => {
                self.error = Some(classify_http_error(
                    error
                        .get("status")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(503) as u16,
                    &error.to_string(),
                ));
            }
            _ => {}
        }
    }

    /// Final JSON body. The completed payload wins; otherwise a minimal
    /// response is assembled from accumulated deltas.
    pub fn finish(self) -> Result<JsonValue, GatewayError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Some(completed) = self.completed {
            return Ok(completed);
        }
        let mut base = self.created.unwrap_or_else(|| {
            json!({"id": "resp_partial", "object": "response", "model": "unknown"})
        });
        let mut output = vec![json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": self.text, "annotations": []}],
        })];
        for (index, arguments) in &self.function_arguments {
            output.push(json!({
                "type": "function_call",
                "call_id": format!("call_{index}"),
                "name": "",
                "arguments": arguments,
            }));
        }
        if let Some(object) = base.as_object_mut() {
            object.insert("output".to_string(), json!(output));
            object.insert("status".to_string(), json!("incomplete"));
        }
        Ok(base)
    }
}
