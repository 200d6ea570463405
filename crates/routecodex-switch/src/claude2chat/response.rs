use routecodex_protocol::claude::messages::{
    ContentBlock, MessagesResponse, MessagesUsage, StopReason,
};
use routecodex_protocol::openai::chat::{ChatCompletionResponse, FinishReason};
use serde_json::Value as JsonValue;

use crate::content::coerce_to_string;

/// Convert a chat-completions response into an Anthropic message response.
pub fn transform_response(response: ChatCompletionResponse, original: &JsonValue) -> MessagesResponse {
    let choice = response.choices.into_iter().next();
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut stop_reason = Some(StopReason::EndTurn);

    if let Some(choice) = choice {
        if let Some(chat_content) = &choice.message.content {
            let text = coerce_to_string(&serde_json::to_value(chat_content).unwrap_or_default());
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for call in tool_calls {
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(JsonValue::Object(Default::default()));
                content.push(ContentBlock::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input,
                });
            }
        }
        stop_reason = Some(map_finish_reason(choice.finish_reason));
    }

    let model = original
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(response.model);

    MessagesResponse {
        id: format!("msg_{}", response.id.trim_start_matches("chatcmpl-")),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model,
        content,
        stop_reason,
        stop_sequence: None,
        usage: response
            .usage
            .map(|u| MessagesUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

fn map_finish_reason(reason: Option<FinishReason>) -> StopReason {
    match reason {
        Some(FinishReason::Length) => StopReason::MaxTokens,
        Some(FinishReason::ToolCalls) => StopReason::ToolUse,
        Some(FinishReason::ContentFilter) => StopReason::Refusal,
        Some(FinishReason::Stop) | None => StopReason::EndTurn,
    }
}
