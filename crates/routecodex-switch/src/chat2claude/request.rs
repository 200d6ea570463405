use routecodex_protocol::claude::messages::{
    ContentBlock, Message, MessageContent, MessageRole, MessagesRequest, SystemPrompt, Tool,
    ToolResultContent,
};
use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool,
};
use serde_json::Value as JsonValue;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Convert a chat-completions request into an Anthropic create-message
/// request. Anthropic requires `max_tokens` and rejects `tool`/`system`
/// roles inside `messages`, so those are re-homed.
pub fn transform_request(request: ChatCompletionRequest) -> MessagesRequest {
    let mut system: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    system.push(content.flatten_text());
                }
            }
            ChatRole::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message
                        .content
                        .as_ref()
                        .map(|c| ToolResultContent::Text(c.flatten_text())),
                    is_error: None,
                };
                // Anthropic expects tool results inside a user turn.
                match messages.last_mut() {
                    Some(Message {
                        role: MessageRole::User,
                        content: MessageContent::Blocks(blocks),
                    }) => blocks.push(block),
                    _ => messages.push(Message {
                        role: MessageRole::User,
                        content: MessageContent::Blocks(vec![block]),
                    }),
                }
            }
            ChatRole::User | ChatRole::Assistant => {
                let role = if message.role == ChatRole::Assistant {
                    MessageRole::Assistant
                } else {
                    MessageRole::User
                };
                let mut blocks: Vec<ContentBlock> = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.flatten_text();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text });
                    }
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        let input: JsonValue = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(JsonValue::Object(Default::default()));
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input,
                        });
                    }
                }
                if !blocks.is_empty() {
                    messages.push(Message {
                        role,
                        content: MessageContent::Blocks(blocks),
                    });
                }
            }
        }
    }

    MessagesRequest {
        model: request.model,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: if system.is_empty() {
            None
        } else {
            Some(SystemPrompt::Text(system.join("\n\n")))
        },
        tools: request.tools.map(map_tools),
        tool_choice: map_tool_choice(request.tool_choice),
        temperature: request.temperature,
        stream: request.stream,
        thinking: None,
        extra: Default::default(),
    }
}

fn map_tools(tools: Vec<ChatTool>) -> Vec<Tool> {
    tools
        .into_iter()
        .map(|tool| Tool {
            name: tool.function.name,
            description: tool.function.description,
            input_schema: tool.function.parameters,
        })
        .collect()
}

fn map_tool_choice(choice: Option<JsonValue>) -> Option<JsonValue> {
    let choice = choice?;
    match choice.as_str() {
        Some("auto") => return Some(serde_json::json!({"type": "auto"})),
        Some("required") => return Some(serde_json::json!({"type": "any"})),
        Some("none") => return None,
        _ => {}
    }
    choice
        .pointer("/function/name")
        .and_then(|v| v.as_str())
        .map(|name| serde_json::json!({"type": "tool", "name": name}))
}
