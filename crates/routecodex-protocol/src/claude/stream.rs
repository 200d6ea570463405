use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::messages::{MessagesUsage, StopReason};

/// Anthropic SSE events. The wire `event:` name matches the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagesStreamEvent {
    MessageStart {
        message: StreamMessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: StreamContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<MessagesUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: JsonValue,
    },
    #[serde(untagged)]
    Unknown(JsonValue),
}

impl MessagesStreamEvent {
    pub fn event_name(&self) -> Option<String> {
        serde_json::to_value(self)
            .ok()?
            .get("type")?
            .as_str()
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessageStart {
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub r#type: String,
    pub role: String,
    pub model: String,
    /// Always empty at message_start; blocks arrive as deltas.
    #[serde(default)]
    pub content: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub usage: MessagesUsage,
}

fn message_type() -> String {
    "message".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: JsonValue,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(untagged)]
    Unknown(JsonValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta {
        text: String,
    },
    /// Partial JSON; accumulate until content_block_stop, then parse.
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {
        signature: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_tags() {
        let event = MessagesStreamEvent::MessageStop;
        assert_eq!(event.event_name().as_deref(), Some("message_stop"));

        let event = MessagesStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentBlockDelta::TextDelta {
                text: "hi".to_string(),
            },
        };
        assert_eq!(event.event_name().as_deref(), Some("content_block_delta"));
    }

    #[test]
    fn text_delta_parses() {
        let event: MessagesStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"He"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            MessagesStreamEvent::ContentBlockDelta {
                delta: ContentBlockDelta::TextDelta { ref text },
                ..
            } if text == "He"
        ));
    }
}
