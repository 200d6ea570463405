use serde_json::{Value as JsonValue, json};

/// Tools the gateway may execute server-side when
/// `ROUTECODEX_TOOL_SERVER_EXEC` is set. Anything off this list surfaces to
/// the client as `required_action` instead.
pub const SERVER_TOOL_WHITELIST: &[&str] = &["get_time", "echo"];

pub fn is_whitelisted(name: &str) -> bool {
    SERVER_TOOL_WHITELIST.contains(&name)
}

/// Execute one whitelisted tool. Returns `None` for unknown tools so the
/// caller can fall back to client-side handling.
pub fn execute(name: &str, arguments: &str) -> Option<String> {
    let args: JsonValue = serde_json::from_str(arguments).unwrap_or(json!({}));
    match name {
        "get_time" => {
            let now = time::OffsetDateTime::now_utc();
            let formatted = now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| now.unix_timestamp().to_string());
            Some(formatted)
        }
        "echo" => Some(
            args.get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        _ => None,
    }
}

/// Tool calls from a chat-shaped upstream response:
/// `(call_id, name, arguments)`.
pub fn chat_tool_calls(response: &JsonValue) -> Vec<(String, String, String)> {
    response
        .pointer("/choices/0/message/tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    Some((
                        call.get("id")?.as_str()?.to_string(),
                        call.pointer("/function/name")?.as_str()?.to_string(),
                        call.pointer("/function/arguments")?
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_text() {
        assert_eq!(
            execute("echo", r#"{"text":"hello"}"#).as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn get_time_is_rfc3339() {
        let value = execute("get_time", "{}").unwrap();
        assert!(value.contains('T'));
    }

    #[test]
    fn unknown_tool_is_none() {
        assert!(execute("rm_rf", "{}").is_none());
        assert!(!is_whitelisted("rm_rf"));
    }

    #[test]
    fn extracts_chat_tool_calls() {
        let response = serde_json::json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "c1", "type": "function",
                 "function": {"name": "echo", "arguments": "{\"text\":\"x\"}"}}
            ]}}]
        });
        let calls = chat_tool_calls(&response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "echo");
    }
}
