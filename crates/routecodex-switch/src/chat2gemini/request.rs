use routecodex_protocol::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiTool, GenerateContentRequest,
    GenerationConfig, Part,
};
use routecodex_protocol::openai::chat::{ChatCompletionRequest, ChatRole, ChatTool};
use serde_json::Value as JsonValue;

/// Convert a chat-completions request into a Gemini generateContent body.
///
/// Gemini has no tool_call_id; function responses are matched by name, so
/// call ids are remembered by the executor, not the wire body.
pub fn transform_request(request: ChatCompletionRequest) -> GenerateContentRequest {
    let mut system_parts: Vec<Part> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    // Pending name lookup so a following tool message can be matched.
    let mut last_call_names: Vec<String> = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.flatten_text();
                    if !text.is_empty() {
                        system_parts.push(Part::Text(text));
                    }
                }
            }
            ChatRole::Tool => {
                let name = last_call_names.pop().unwrap_or_default();
                let output = message
                    .content
                    .as_ref()
                    .map(|c| c.flatten_text())
                    .unwrap_or_default();
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::FunctionResponse(FunctionResponse {
                        name,
                        response: serde_json::json!({"result": output}),
                    })],
                });
            }
            ChatRole::User | ChatRole::Assistant => {
                let role = if message.role == ChatRole::Assistant {
                    "model"
                } else {
                    "user"
                };
                let mut parts: Vec<Part> = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.flatten_text();
                    if !text.is_empty() {
                        parts.push(Part::Text(text));
                    }
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls.iter().rev() {
                        last_call_names.push(call.function.name.clone());
                    }
                    for call in tool_calls {
                        let args: JsonValue = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(JsonValue::Object(Default::default()));
                        parts.push(Part::FunctionCall(FunctionCall {
                            name: call.function.name.clone(),
                            args,
                        }));
                    }
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some(role.to_string()),
                        parts,
                    });
                }
            }
        }
    }

    GenerateContentRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
        tools: request.tools.map(map_tools),
        generation_config: Some(GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            extra: Default::default(),
        }),
        extra: Default::default(),
    }
}

fn map_tools(tools: Vec<ChatTool>) -> Vec<GeminiTool> {
    let declarations: Vec<FunctionDeclaration> = tools
        .into_iter()
        .map(|tool| FunctionDeclaration {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters.map(strip_schema_extras),
        })
        .collect();
    vec![GeminiTool {
        function_declarations: Some(declarations),
    }]
}

/// Gemini's schema validator rejects JSON-Schema keys it does not know.
fn strip_schema_extras(mut schema: JsonValue) -> JsonValue {
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("additionalProperties");
        for value in object.values_mut() {
            if value.is_object() || value.is_array() {
                *value = strip_schema_extras(value.take());
            }
        }
    } else if let Some(array) = schema.as_array_mut() {
        for value in array.iter_mut() {
            if value.is_object() || value.is_array() {
                *value = strip_schema_extras(value.take());
            }
        }
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roles_map_to_gemini_roles() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-pro",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello"}
            ]
        }))
        .unwrap();
        let out = transform_request(request);
        assert!(out.system_instruction.is_some());
        assert_eq!(out.contents.len(), 2);
        assert_eq!(out.contents[0].role.as_deref(), Some("user"));
        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn schema_extras_are_stripped() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-pro",
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "echo",
                    "parameters": {
                        "$schema": "http://json-schema.org/draft-07/schema#",
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {"s": {"type": "string"}}
                    }
                }
            }]
        }))
        .unwrap();
        let out = transform_request(request);
        let declaration = &out.tools.unwrap()[0]
            .function_declarations
            .as_ref()
            .unwrap()[0];
        let params = declaration.parameters.as_ref().unwrap();
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
        assert!(params.pointer("/properties/s").is_some());
    }
}
