use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool,
};
use routecodex_protocol::openai::responses::{
    InputContent, InputItem, ResponsesInput, ResponsesRequest, ResponsesTool,
};

use crate::content::coerce_to_string;

/// Convert a chat-completions request into a Responses request.
///
/// System/developer messages collapse into `instructions`; tool-call and
/// tool-result messages become `function_call`/`function_call_output` input
/// items so the upstream can resume a tool loop mid-conversation.
pub fn transform_request(request: ChatCompletionRequest) -> ResponsesRequest {
    let mut instructions: Vec<String> = Vec::new();
    let mut items: Vec<InputItem> = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = flatten(content);
                    if !text.is_empty() {
                        instructions.push(text);
                    }
                }
            }
            ChatRole::Tool => {
                let call_id = message.tool_call_id.clone().unwrap_or_default();
                let output = message.content.as_ref().map(flatten).unwrap_or_default();
                items.push(InputItem::FunctionCallOutput { call_id, output });
            }
            ChatRole::User | ChatRole::Assistant => {
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        items.push(InputItem::FunctionCall {
                            id: None,
                            call_id: call.id.clone(),
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.clone(),
                        });
                    }
                }
                if let Some(content) = &message.content {
                    let text = flatten(content);
                    if !text.is_empty() || message.tool_calls.is_none() {
                        items.push(InputItem::Message {
                            role: role_name(message.role).to_string(),
                            content: InputContent::Text(text),
                        });
                    }
                }
            }
        }
    }

    ResponsesRequest {
        model: request.model,
        input: Some(ResponsesInput::Items(items)),
        instructions: if instructions.is_empty() {
            None
        } else {
            Some(instructions.join("\n\n"))
        },
        tools: request.tools.map(map_tools),
        tool_choice: request.tool_choice,
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: request.stream,
        previous_response_id: None,
        extra: Default::default(),
    }
}

fn flatten(content: &routecodex_protocol::openai::chat::ChatContent) -> String {
    match serde_json::to_value(content) {
        Ok(value) => coerce_to_string(&value),
        Err(_) => String::new(),
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::Assistant => "assistant",
        _ => "user",
    }
}

/// Chat tools nest the function under `function`; Responses tools are flat.
fn map_tools(tools: Vec<ChatTool>) -> Vec<ResponsesTool> {
    tools
        .into_iter()
        .map(|tool| ResponsesTool {
            r#type: "function".to_string(),
            name: Some(tool.function.name),
            description: tool.function.description,
            parameters: tool.function.parameters,
        })
        .collect()
}
