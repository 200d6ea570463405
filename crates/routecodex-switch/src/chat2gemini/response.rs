use routecodex_protocol::gemini::{GenerateContentResponse, Part};
use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionResponse, ChatContent, ChatMessage, ChatRole, FinishReason, ToolCall,
    ToolCallFunction,
};
use routecodex_protocol::usage::Usage;
use serde_json::Value as JsonValue;

/// Convert a Gemini generateContent response into a chat-completions
/// response. Gemini function calls carry no ids; synthetic `call_<n>` ids
/// are minted so the chat shape stays well-formed.
pub fn transform_response(
    response: GenerateContentResponse,
    original: &JsonValue,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut finish_reason = FinishReason::Stop;

    if let Some(candidate) = response.candidates.first() {
        for part in &candidate.content.parts {
            match part {
                Part::Text(t) => text.push_str(t),
                Part::FunctionCall(call) => {
                    tool_calls.push(ToolCall {
                        id: format!("call_{}", tool_calls.len() + 1),
                        r#type: "function".to_string(),
                        function: ToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.args.to_string(),
                        },
                    });
                }
                Part::FunctionResponse(_) | Part::Unknown(_) => {}
            }
        }
        finish_reason = match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };
    }

    let model = original
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or(response.model_version)
        .unwrap_or_else(|| "gemini".to_string());

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid_like()),
        object: "chat.completion".to_string(),
        created: 0,
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: ChatRole::Assistant,
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(ChatContent::Text(text))
                },
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: response.usage_metadata.map(|meta| Usage {
            prompt_tokens: meta.prompt_token_count,
            completion_tokens: meta.candidates_token_count,
            total_tokens: meta.total_token_count,
        }),
        extra: Default::default(),
    }
}

/// Cheap unique suffix without pulling a uuid dependency into this crate.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("g{nanos:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_text_becomes_content() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1, "totalTokenCount": 3}
        }))
        .unwrap();
        let out = transform_response(response, &json!({"model": "gpt-x"}));
        let content = serde_json::to_value(&out.choices[0].message.content).unwrap();
        assert_eq!(content, "Hello");
        assert_eq!(out.usage.unwrap().total_tokens, 3);
    }

    #[test]
    fn function_call_gets_synthetic_id() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "get_time", "args": {"tz": "UTC"}}}
                ]}
            }]
        }))
        .unwrap();
        let out = transform_response(response, &json!({}));
        let call = &out.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.function.name, "get_time");
        assert_eq!(out.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }
}
