use bytes::Bytes;
use routecodex_protocol::Dialect;
use routecodex_protocol::sse::{encode_openai_done, encode_sse};
use routecodex_protocol::usage::usage_from_value;
use serde_json::{Value as JsonValue, json};

use crate::content::split_words;

/// Suggested pacing between synthesized delta frames.
pub const SYNTH_DELTA_PACING_MS: u64 = 20;

/// Synthesize an inbound-dialect SSE stream from a non-streaming response
/// body (already translated into the inbound dialect). The caller paces the
/// frames (~20 ms apart for deltas).
pub fn synthesize_stream(dialect: Dialect, body: &JsonValue) -> Vec<Bytes> {
    match dialect {
        Dialect::OpenaiChat => synthesize_chat(body),
        Dialect::OpenaiResponses => synthesize_responses(body),
        Dialect::AnthropicMessages => synthesize_claude(body),
        Dialect::GeminiChat => synthesize_gemini(body),
    }
}

fn synthesize_chat(body: &JsonValue) -> Vec<Bytes> {
    let id = body.get("id").and_then(|v| v.as_str()).unwrap_or("chatcmpl-synth");
    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown");
    let created = body.get("created").and_then(|v| v.as_i64()).unwrap_or(0);
    let message = body.pointer("/choices/0/message");
    let text = message
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let tool_calls = message.and_then(|m| m.get("tool_calls")).cloned();
    let finish = body
        .pointer("/choices/0/finish_reason")
        .cloned()
        .unwrap_or(json!("stop"));

    let chunk = |delta: JsonValue, finish_reason: JsonValue, usage: JsonValue| {
        encode_sse(
            None,
            &json!({
                "id": id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
                "usage": usage,
            })
            .to_string(),
        )
    };

    let mut frames = Vec::new();
    frames.push(chunk(json!({"role": "assistant"}), JsonValue::Null, JsonValue::Null));
    for word in split_words(text) {
        frames.push(chunk(json!({"content": word}), JsonValue::Null, JsonValue::Null));
    }
    if let Some(tool_calls) = tool_calls {
        if let Some(calls) = tool_calls.as_array() {
            for (index, call) in calls.iter().enumerate() {
                frames.push(chunk(
                    json!({"tool_calls": [{
                        "index": index,
                        "id": call.get("id"),
                        "type": "function",
                        "function": call.get("function"),
                    }]}),
                    JsonValue::Null,
                    JsonValue::Null,
                ));
            }
        }
    }
    let usage = body.get("usage").cloned().unwrap_or(JsonValue::Null);
    frames.push(chunk(json!({}), finish, usage));
    frames.push(encode_openai_done());
    frames
}

fn synthesize_responses(body: &JsonValue) -> Vec<Bytes> {
    let id = body.get("id").and_then(|v| v.as_str()).unwrap_or("resp_synth");
    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown");
    let created = body.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0);
    let text: String = collect_responses_text(body);

    let named = |name: &str, data: JsonValue| encode_sse(Some(name), &data.to_string());
    let skeleton = json!({
        "id": id,
        "object": "response",
        "created_at": created,
        "model": model,
        "status": "in_progress",
    });

    let mut frames = Vec::new();
    frames.push(named(
        "response.created",
        json!({"type": "response.created", "response": skeleton}),
    ));
    frames.push(named(
        "response.in_progress",
        json!({"type": "response.in_progress", "response": skeleton}),
    ));
    for word in split_words(&text) {
        frames.push(named(
            "response.output_text.delta",
            json!({"type": "response.output_text.delta", "output_index": 0, "delta": word}),
        ));
    }
    frames.push(named(
        "response.output_text.done",
        json!({"type": "response.output_text.done", "output_index": 0, "text": text}),
    ));
    let usage = usage_from_value(body)
        .map(|u| u.io_json())
        .unwrap_or(JsonValue::Null);
    let mut completed = body.clone();
    if let Some(object) = completed.as_object_mut() {
        object.insert("status".to_string(), json!("completed"));
        object.insert("usage".to_string(), usage);
    }
    frames.push(named(
        "response.completed",
        json!({"type": "response.completed", "response": completed}),
    ));
    frames.push(named("response.done", json!({"type": "response.done"})));
    frames
}

fn collect_responses_text(body: &JsonValue) -> String {
    // Aggregation order: output[] text, nested message blocks, then a chat
    // shape's choices[0].message.content as a last resort.
    let mut out = String::new();
    if let Some(output) = body.get("output").and_then(|v| v.as_array()) {
        for item in output {
            if item.get("type").and_then(|v| v.as_str()) == Some("message") {
                if let Some(parts) = item.get("content").and_then(|v| v.as_array()) {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                            out.push_str(text);
                        }
                    }
                }
            } else if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
        }
    }
    if out.is_empty() {
        if let Some(text) = body.pointer("/message/content").and_then(|v| v.as_str()) {
            out.push_str(text);
        }
    }
    if out.is_empty() {
        if let Some(text) = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
        {
            out.push_str(text);
        }
    }
    out
}

fn synthesize_claude(body: &JsonValue) -> Vec<Bytes> {
    let id = body.get("id").and_then(|v| v.as_str()).unwrap_or("msg_synth");
    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown");
    let text: String = body
        .get("content")
        .and_then(|v| v.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .concat()
        })
        .unwrap_or_default();
    let stop_reason = body
        .get("stop_reason")
        .cloned()
        .unwrap_or(json!("end_turn"));
    let usage = body.get("usage").cloned().unwrap_or(json!({
        "input_tokens": 0, "output_tokens": 0
    }));

    let named = |name: &str, data: JsonValue| encode_sse(Some(name), &data.to_string());

    let mut frames = Vec::new();
    frames.push(named(
        "message_start",
        json!({"type": "message_start", "message": {
            "id": id, "type": "message", "role": "assistant", "model": model,
            "content": [], "usage": {"input_tokens": 0, "output_tokens": 0},
        }}),
    ));
    frames.push(named(
        "content_block_start",
        json!({"type": "content_block_start", "index": 0,
               "content_block": {"type": "text", "text": ""}}),
    ));
    for word in split_words(&text) {
        frames.push(named(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": word}}),
        ));
    }
    frames.push(named(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": 0}),
    ));
    frames.push(named(
        "message_delta",
        json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}, "usage": usage}),
    ));
    frames.push(named("message_stop", json!({"type": "message_stop"})));
    frames
}

fn synthesize_gemini(body: &JsonValue) -> Vec<Bytes> {
    // Gemini stream frames are whole GenerateContentResponse objects.
    vec![encode_sse(None, &body.to_string())]
}

/// `required_action` event emitted before a server-side tool loop's second
/// turn, so submit_tool_outputs clients can intercept.
pub fn required_action_event(response_id: &str, tool_calls: &JsonValue) -> Bytes {
    encode_sse(
        Some("response.required_action"),
        &json!({
            "type": "response.required_action",
            "response": {
                "id": response_id,
                "status": "requires_action",
                "required_action": {
                    "type": "submit_tool_outputs",
                    "submit_tool_outputs": {"tool_calls": tool_calls},
                }
            }
        })
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(frames: &[Bytes]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| {
                let text = String::from_utf8_lossy(frame);
                text.lines()
                    .find(|line| line.starts_with("event: "))
                    .map(|line| line.trim_start_matches("event: ").to_string())
            })
            .collect()
    }

    #[test]
    fn responses_synthesis_follows_mandatory_order() {
        let body = json!({
            "id": "resp_1",
            "model": "gpt-5.1",
            "output": [{"type": "message", "role": "assistant", "content": [
                {"type": "output_text", "text": "Hello world"}
            ]}],
            "usage": {"input_tokens": 1, "output_tokens": 2}
        });
        let frames = synthesize_stream(Dialect::OpenaiResponses, &body);
        let names = names(&frames);
        assert_eq!(names[0], "response.created");
        assert_eq!(names[1], "response.in_progress");
        assert!(names[2..names.len() - 3]
            .iter()
            .all(|n| n == "response.output_text.delta"));
        assert_eq!(names[names.len() - 3], "response.output_text.done");
        assert_eq!(names[names.len() - 2], "response.completed");
        assert_eq!(names[names.len() - 1], "response.done");
    }

    #[test]
    fn responses_usage_maps_from_chat_spelling() {
        let body = json!({
            "id": "resp_1",
            "model": "gpt-5.1",
            "output": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });
        let frames = synthesize_stream(Dialect::OpenaiResponses, &body);
        let completed = frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).to_string())
            .find(|f| f.contains("response.completed"))
            .unwrap();
        assert!(completed.contains(r#""input_tokens":3"#));
        assert!(completed.contains(r#""output_tokens":4"#));
    }

    #[test]
    fn chat_synthesis_word_deltas_reassemble() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello brave world"},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        });
        let frames = synthesize_stream(Dialect::OpenaiChat, &body);
        let text: String = frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).to_string())
            .collect();
        assert!(text.contains(r#""content":"Hello ""#));
        assert!(text.contains(r#""content":"world""#));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn claude_synthesis_terminates_with_message_stop() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-3",
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let frames = synthesize_stream(Dialect::AnthropicMessages, &body);
        let names = names(&frames);
        assert_eq!(names.first().map(String::as_str), Some("message_start"));
        assert_eq!(names.last().map(String::as_str), Some("message_stop"));
    }
}
