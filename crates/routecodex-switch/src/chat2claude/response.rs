use routecodex_protocol::claude::messages::{ContentBlock, MessagesResponse, StopReason};
use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionResponse, ChatContent, ChatMessage, ChatRole, FinishReason, ToolCall,
    ToolCallFunction,
};
use routecodex_protocol::usage::Usage;
use serde_json::Value as JsonValue;

/// Convert an Anthropic message response into a chat-completions response.
pub fn transform_response(response: MessagesResponse, original: &JsonValue) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::Thinking { .. } => {}
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    r#type: "function".to_string(),
                    function: ToolCallFunction {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown(_) => {}
        }
    }

    let finish_reason = match response.stop_reason {
        Some(StopReason::MaxTokens) => FinishReason::Length,
        Some(StopReason::ToolUse) => FinishReason::ToolCalls,
        Some(StopReason::Refusal) => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    let model = original
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(response.model);

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", response.id.trim_start_matches("msg_")),
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
        usage: Some(Usage::new(
            response.usage.input_tokens,
            response.usage.output_tokens,
        )),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_blocks_concatenate() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3",
            "content": [
                {"type": "text", "text": "Hel"},
                {"type": "text", "text": "lo"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }))
        .unwrap();
        let out = transform_response(response, &json!({"model": "gpt-x"}));
        let content = serde_json::to_value(&out.choices[0].message.content).unwrap();
        assert_eq!(content, "Hello");
        assert_eq!(out.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn tool_use_serializes_arguments_as_string() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3",
            "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "echo", "input": {"s": "hi"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }))
        .unwrap();
        let out = transform_response(response, &json!({}));
        let call = &out.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.arguments, "{\"s\":\"hi\"}");
        assert_eq!(out.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }
}
