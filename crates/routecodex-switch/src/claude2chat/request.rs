use routecodex_protocol::claude::messages::{
    ContentBlock, Message, MessageContent, MessageRole, MessagesRequest, Tool,
};
use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool, ToolCall, ToolCallFunction,
    ToolFunction,
};

use crate::content::arguments_as_string;

/// Convert an Anthropic create-message request into a chat-completions
/// request. Block arrays flatten to strings; tool_use blocks become
/// assistant tool_calls; tool_result blocks become `{role:"tool"}` messages.
pub fn transform_request(request: MessagesRequest) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = &request.system {
        let text = system.flatten_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text(ChatRole::System, text));
        }
    }

    for message in &request.messages {
        messages.extend(map_message(message));
    }

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: request.tools.map(map_tools),
        tool_choice: map_tool_choice(request.tool_choice),
        temperature: request.temperature,
        max_tokens: if request.max_tokens > 0 {
            Some(request.max_tokens)
        } else {
            None
        },
        stream: request.stream,
        stream_options: None,
        extra: Default::default(),
    }
}

fn map_message(message: &Message) -> Vec<ChatMessage> {
    let role = match message.role {
        MessageRole::User => ChatRole::User,
        MessageRole::Assistant => ChatRole::Assistant,
    };

    match &message.content {
        MessageContent::Text(text) => vec![ChatMessage::text(role, text.clone())],
        MessageContent::Blocks(blocks) => {
            let mut out = Vec::new();
            let mut text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::Thinking { .. } => {}
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            r#type: "function".to_string(),
                            function: ToolCallFunction {
                                name: name.clone(),
                                arguments: arguments_as_string(input),
                            },
                        });
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        let output = content
                            .as_ref()
                            .map(|c| c.flatten_text())
                            .unwrap_or_default();
                        out.push(ChatMessage::tool_result(tool_use_id.clone(), output));
                    }
                    ContentBlock::Unknown(value) => {
                        if let Some(t) = value.get("text").and_then(|v| v.as_str()) {
                            text.push_str(t);
                        }
                    }
                }
            }

            if !text.is_empty() || !tool_calls.is_empty() {
                let chat = ChatMessage {
                    role,
                    content: if text.is_empty() {
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
                };
                // The turn itself precedes any tool results it carried.
                out.insert(0, chat);
            }
            if out.is_empty() {
                out.push(ChatMessage::text(role, String::new()));
            }
            out
        }
    }
}

fn map_tools(tools: Vec<Tool>) -> Vec<ChatTool> {
    tools
        .into_iter()
        .map(|tool| ChatTool {
            r#type: "function".to_string(),
            function: ToolFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        })
        .collect()
}

fn map_tool_choice(choice: Option<serde_json::Value>) -> Option<serde_json::Value> {
    let choice = choice?;
    match choice.get("type").and_then(|v| v.as_str()) {
        Some("auto") => Some(serde_json::json!("auto")),
        Some("any") => Some(serde_json::json!("required")),
        Some("tool") => choice.get("name").and_then(|v| v.as_str()).map(|name| {
            serde_json::json!({"type": "function", "function": {"name": name}})
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_text_flattens_to_string_content() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3",
            "max_tokens": 32,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "Hi"}]}
            ]
        }))
        .unwrap();
        let out = transform_request(request);
        assert_eq!(out.messages.len(), 1);
        let content = serde_json::to_value(&out.messages[0].content).unwrap();
        assert_eq!(content, "Hi");
    }

    #[test]
    fn tool_use_becomes_tool_call_with_string_arguments() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3",
            "max_tokens": 32,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_time", "input": {"tz": "UTC"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "12:00"}
                ]}
            ]
        }))
        .unwrap();
        let out = transform_request(request);
        let call = &out.messages[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.function.arguments, "{\"tz\":\"UTC\"}");
        assert_eq!(out.messages[1].role, ChatRole::Tool);
        assert_eq!(out.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn tool_choice_any_maps_to_required() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3",
            "max_tokens": 32,
            "messages": [{"role": "user", "content": "x"}],
            "tool_choice": {"type": "any"}
        }))
        .unwrap();
        let out = transform_request(request);
        assert_eq!(out.tool_choice, Some(json!("required")));
    }
}
