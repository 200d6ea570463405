use routecodex_protocol::openai::chat::{ChatCompletionResponse, FinishReason};
use routecodex_protocol::openai::responses::{
    OutputContent, OutputItem, ResponseStatus, ResponsesResponse,
};
use serde_json::Value as JsonValue;

use crate::content::coerce_to_string;

/// Convert a chat-completions response into a Responses result.
pub fn transform_response(
    response: ChatCompletionResponse,
    original: &JsonValue,
) -> ResponsesResponse {
    let choice = response.choices.into_iter().next();
    let mut output: Vec<OutputItem> = Vec::new();
    let mut status = ResponseStatus::Completed;

    if let Some(choice) = choice {
        if let Some(content) = &choice.message.content {
            let text = coerce_to_string(&serde_json::to_value(content).unwrap_or_default());
            if !text.is_empty() {
                output.push(OutputItem::Message {
                    id: Some(format!("msg_{}", response.id.trim_start_matches("chatcmpl-"))),
                    role: "assistant".to_string(),
                    content: vec![OutputContent::OutputText {
                        text,
                        annotations: Vec::new(),
                    }],
                });
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for call in tool_calls {
                output.push(OutputItem::FunctionCall {
                    id: None,
                    call_id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                });
            }
        }
        if choice.finish_reason == Some(FinishReason::ToolCalls) {
            status = ResponseStatus::RequiresAction;
        }
    }

    let model = original
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(response.model);

    ResponsesResponse {
        id: format!("resp_{}", response.id.trim_start_matches("chatcmpl-")),
        object: "response".to_string(),
        created_at: response.created,
        status,
        model,
        output,
        usage: response.usage.map(|u| u.normalized()),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_text_becomes_output_message() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "created": 3,
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
        .unwrap();
        let out = transform_response(response, &json!({"model": "gpt-x"}));
        assert_eq!(out.id, "resp_1");
        assert_eq!(out.output_text(), "Hello");
        assert_eq!(out.status, ResponseStatus::Completed);
    }

    #[test]
    fn tool_calls_set_requires_action() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_time", "arguments": "{}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let out = transform_response(response, &json!({}));
        assert_eq!(out.status, ResponseStatus::RequiresAction);
        assert_eq!(out.function_calls().len(), 1);
    }
}
