use serde_json::Value as JsonValue;

/// Flatten any non-string message content into a single string for strict
/// chat upstreams.
///
/// Text blocks concatenate; tool-call blocks serialize as
/// `Function <name>(<arguments>)`; anything else is JSON-stringified.
pub fn coerce_to_string(content: &JsonValue) -> String {
    match content {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                push_block_text(&mut out, block);
            }
            out
        }
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn push_block_text(out: &mut String, block: &JsonValue) {
    if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
        out.push_str(text);
        return;
    }
    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match block_type {
        "tool_use" => {
            let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = block
                .get("input")
                .map(|input| input.to_string())
                .unwrap_or_default();
            out.push_str(&format!("Function {name}({arguments})"));
        }
        "tool_result" => {
            if let Some(content) = block.get("content") {
                out.push_str(&coerce_to_string(content));
            }
        }
        _ => {
            if let Some(text) = block.as_str() {
                out.push_str(text);
            } else {
                out.push_str(&block.to_string());
            }
        }
    }
}

/// Tool-call `arguments` must always be a string on the chat wire; objects
/// arriving from looser dialects get JSON-encoded.
pub fn arguments_as_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        JsonValue::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Split text into word-level delta chunks for synthesized streams.
/// Whitespace stays attached to the preceding word so concatenation
/// reproduces the input exactly.
pub fn split_words(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        let is_space = ch.is_whitespace();
        if !is_space && in_space && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
        in_space = is_space;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_passes_through() {
        assert_eq!(coerce_to_string(&json!("Hi")), "Hi");
    }

    #[test]
    fn block_array_flattens_text_and_tools() {
        let content = json!([
            {"type": "text", "text": "run: "},
            {"type": "tool_use", "id": "t1", "name": "get_time", "input": {"tz": "UTC"}}
        ]);
        assert_eq!(
            coerce_to_string(&content),
            "run: Function get_time({\"tz\":\"UTC\"})"
        );
    }

    #[test]
    fn object_content_is_stringified() {
        let content = json!({"weird": true});
        assert_eq!(coerce_to_string(&content), "{\"weird\":true}");
    }

    #[test]
    fn split_words_round_trips() {
        let chunks = split_words("Hello brave  new world");
        assert_eq!(chunks.concat(), "Hello brave  new world");
        assert_eq!(chunks[0], "Hello ");
        assert_eq!(chunks.last().unwrap(), "world");
    }

    #[test]
    fn arguments_object_becomes_string() {
        assert_eq!(arguments_as_string(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(arguments_as_string(&json!("{}")), "{}");
    }
}
