use routecodex_common::RequestId;
use routecodex_protocol::Dialect;
use routecodex_provider::ByteStream;
use serde_json::Value as JsonValue;

/// Which inbound surface received the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEndpoint {
    ChatCompletions,
    Messages,
    Responses,
    SubmitToolOutputs { response_id: String },
}

impl EntryEndpoint {
    pub fn dialect(&self) -> Dialect {
        match self {
            EntryEndpoint::ChatCompletions => Dialect::OpenaiChat,
            EntryEndpoint::Messages => Dialect::AnthropicMessages,
            EntryEndpoint::Responses | EntryEndpoint::SubmitToolOutputs { .. } => {
                Dialect::OpenaiResponses
            }
        }
    }
}

/// Client connection state carried alongside the body.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub request_id: Option<RequestId>,
    /// Pre-hinted route; wins over the classifier.
    pub route_hint: Option<String>,
    /// Client asked for SSE (Accept header or stream:true).
    pub stream: bool,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Set by the retry loop so snapshots can tell attempts apart.
    pub retry_attempt: u32,
}

#[derive(Debug)]
pub struct InboundRequest {
    pub endpoint: EntryEndpoint,
    pub headers: Vec<(String, String)>,
    pub body: JsonValue,
    pub metadata: RequestMetadata,
}

/// Response body handed back to the HTTP adapter.
pub enum ExecBody {
    Json(JsonValue),
    Stream(ByteStream),
}

impl std::fmt::Debug for ExecBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ExecBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ExecBody,
}

impl ExecutionResult {
    pub fn json(body: JsonValue) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: ExecBody::Json(body),
        }
    }

    pub fn sse(stream: ByteStream) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("content-type".to_string(), "text/event-stream".to_string()),
                ("cache-control".to_string(), "no-cache".to_string()),
            ],
            body: ExecBody::Stream(stream),
        }
    }
}
