use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool, ToolCall, ToolCallFunction,
    ToolFunction,
};
use routecodex_protocol::openai::responses::{
    InputItem, ResponsesInput, ResponsesRequest, ResponsesTool,
};

/// Convert a Responses request into a chat-completions request.
pub fn transform_request(request: ResponsesRequest) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(instructions) = &request.instructions {
        if !instructions.is_empty() {
            messages.push(ChatMessage::text(ChatRole::System, instructions.clone()));
        }
    }

    match request.input {
        Some(ResponsesInput::Text(text)) => {
            messages.push(ChatMessage::text(ChatRole::User, text));
        }
        Some(ResponsesInput::Items(items)) => {
            for item in items {
                match item {
                    InputItem::Message { role, content } => {
                        let role = match role.as_str() {
                            "assistant" => ChatRole::Assistant,
                            "system" | "developer" => ChatRole::System,
                            _ => ChatRole::User,
                        };
                        messages.push(ChatMessage::text(role, content.flatten_text()));
                    }
                    InputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                        ..
                    } => {
                        messages.push(ChatMessage {
                            role: ChatRole::Assistant,
                            content: None,
                            name: None,
                            tool_calls: Some(vec![ToolCall {
                                id: call_id,
                                r#type: "function".to_string(),
                                function: ToolCallFunction { name, arguments },
                            }]),
                            tool_call_id: None,
                        });
                    }
                    InputItem::FunctionCallOutput { call_id, output } => {
                        messages.push(ChatMessage::tool_result(call_id, output));
                    }
                    InputItem::Unknown(_) => {}
                }
            }
        }
        None => {}
    }

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: request.tools.map(map_tools),
        tool_choice: request.tool_choice,
        temperature: request.temperature,
        max_tokens: request.max_output_tokens,
        stream: request.stream,
        stream_options: None,
        extra: Default::default(),
    }
}

fn map_tools(tools: Vec<ResponsesTool>) -> Vec<ChatTool> {
    tools
        .into_iter()
        .filter_map(|tool| {
            let name = tool.name?;
            Some(ChatTool {
                r#type: "function".to_string(),
                function: ToolFunction {
                    name,
                    description: tool.description,
                    parameters: tool.parameters,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_input_becomes_user_message() {
        let request: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5.1",
            "instructions": "be nice",
            "input": "Hi there"
        }))
        .unwrap();
        let out = transform_request(request);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, ChatRole::System);
        assert_eq!(out.messages[1].role, ChatRole::User);
    }

    #[test]
    fn function_items_round_trip_to_tool_messages() {
        let request: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5.1",
            "input": [
                {"type": "message", "role": "user", "content": "time?"},
                {"type": "function_call", "call_id": "c1", "name": "get_time", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "12:00"}
            ]
        }))
        .unwrap();
        let out = transform_request(request);
        assert_eq!(out.messages.len(), 3);
        assert_eq!(
            out.messages[1].tool_calls.as_ref().unwrap()[0].id,
            "c1"
        );
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("c1"));
    }
}
