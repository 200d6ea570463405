use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, ToolCall,
    ToolCallFunction,
};
use routecodex_protocol::openai::responses::{OutputItem, ResponsesResponse};
use serde_json::Value as JsonValue;

/// Convert a Responses result into a chat-completions response.
pub fn transform_response(response: ResponsesResponse, original: &JsonValue) -> ChatCompletionResponse {
    let text = response.output_text();
    let tool_calls: Vec<ToolCall> = response
        .output
        .iter()
        .filter_map(|item| match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => Some(ToolCall {
                id: call_id.clone(),
                r#type: "function".to_string(),
                function: ToolCallFunction {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            _ => None,
        })
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    };

    let model = original
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| response.model.clone());

    ChatCompletionResponse {
        id: response.id.replace("resp_", "chatcmpl-"),
        object: "chat.completion".to_string(),
        created: response.created_at,
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: ChatRole::Assistant,
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(routecodex_protocol::openai::chat::ChatContent::Text(text))
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
        usage: response.usage.map(|u| u.normalized()),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_output_maps_to_choice_content() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "model": "gpt-5.1-upstream",
            "output": [
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hello!"}
                ]}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }))
        .unwrap();
        let original = json!({"model": "gpt-5.1"});
        let out = transform_response(response, &original);
        assert_eq!(out.model, "gpt-5.1");
        assert_eq!(out.id, "chatcmpl-abc");
        let content = serde_json::to_value(&out.choices[0].message.content).unwrap();
        assert_eq!(content, "Hello!");
        assert_eq!(out.usage.unwrap().total_tokens, 2);
    }

    #[test]
    fn function_calls_become_tool_calls() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "model": "gpt-5.1",
            "output": [
                {"type": "function_call", "call_id": "call_9", "name": "get_time", "arguments": "{}"}
            ]
        }))
        .unwrap();
        let out = transform_response(response, &json!({}));
        let message = &out.choices[0].message;
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].id, "call_9");
        assert_eq!(
            out.choices[0].finish_reason,
            Some(FinishReason::ToolCalls)
        );
    }
}
