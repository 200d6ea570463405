use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use routecodex_auth::{AuthHome, NoBrowser, OAuthLifecycle};
use routecodex_common::{GatewayError, NoopRecorder, ProviderKey, Settings};
use routecodex_core::config::RoutingConfig;
use routecodex_core::request::{
    EntryEndpoint, ExecBody, InboundRequest, RequestMetadata,
};
use routecodex_core::{RequestExecutor, VirtualRouter};
use routecodex_provider::client::{ProviderClient, ProviderData, ProviderResponse};
use routecodex_provider::config::{ProviderAuth, ProviderConfig, ProviderType};
use routecodex_provider::{ByteStream, ProviderRuntime};
use routecodex_switch::SwitchTable;
use serde_json::{Value as JsonValue, json};

struct ScriptedClient {
    calls: Arc<AtomicUsize>,
    steps: std::sync::Mutex<VecDeque<Step>>,
}

enum Step {
    Json(JsonValue),
    Sse(Vec<String>),
    Fail(GatewayError),
}

impl ScriptedClient {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::new(AtomicUsize::new(0)),
            steps: std::sync::Mutex::new(steps.into()),
        })
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn send_request(
        &self,
        _payload: JsonValue,
        _stream: bool,
    ) -> Result<ProviderResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Fail(GatewayError::internal("script exhausted")));
        match step {
            Step::Json(value) => Ok(ProviderResponse::json(value)),
            Step::Sse(frames) => {
                let stream: ByteStream = Box::pin(futures_util::stream::iter(
                    frames
                        .into_iter()
                        .map(|frame| Ok(Bytes::from(frame)))
                        .collect::<Vec<Result<Bytes, GatewayError>>>(),
                ));
                Ok(ProviderResponse {
                    data: ProviderData::Stream(stream),
                    status: 200,
                    headers: vec![(
                        "content-type".to_string(),
                        "text/event-stream".to_string(),
                    )],
                })
            }
            Step::Fail(err) => Err(err),
        }
    }

    async fn cleanup(&self) {}
}

fn provider_config(provider_id: &str, provider_type: ProviderType) -> ProviderConfig {
    ProviderConfig {
        provider_id: provider_id.to_string(),
        provider_type,
        endpoint: String::new(),
        headers: Vec::new(),
        auth: ProviderAuth::None,
        mock_dialect: None,
        proxy: None,
        oauth: None,
    }
}

async fn build_executor(
    routes: Vec<(&str, Vec<&str>)>,
    providers: Vec<ProviderConfig>,
    clients: Vec<(&str, Arc<ScriptedClient>)>,
    settings: Settings,
) -> RequestExecutor {
    let mut route_map = HashMap::new();
    for (name, pool) in routes {
        route_map.insert(
            name.to_string(),
            pool.iter()
                .map(|key| key.parse::<ProviderKey>().unwrap())
                .collect(),
        );
    }
    let config = RoutingConfig {
        routes: route_map,
        providers: providers.clone(),
        default_route: "default".to_string(),
        long_context_threshold: 60_000,
    };

    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let lifecycle = Arc::new(OAuthLifecycle::new(home.clone(), Arc::new(NoBrowser)));
    let runtime = Arc::new(ProviderRuntime::new(
        providers,
        settings.clone(),
        home,
        lifecycle,
    ));
    for (key, client) in clients {
        runtime
            .install(key.parse().unwrap(), client as Arc<dyn ProviderClient>)
            .await;
    }

    RequestExecutor::new(
        Arc::new(VirtualRouter::new(config)),
        runtime,
        Arc::new(SwitchTable::new()),
        settings,
        Arc::new(NoopRecorder),
    )
}

fn chat_request(body: JsonValue, stream: bool) -> InboundRequest {
    InboundRequest {
        endpoint: EntryEndpoint::ChatCompletions,
        headers: Vec::new(),
        body,
        metadata: RequestMetadata {
            stream,
            ..Default::default()
        },
    }
}

async fn collect_stream(body: ExecBody) -> String {
    match body {
        ExecBody::Stream(mut stream) => {
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk.unwrap());
            }
            String::from_utf8(out).unwrap()
        }
        ExecBody::Json(value) => panic!("expected stream, got {value}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_to_chat_json_round_trips_verbatim() {
    let upstream_body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-x",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    });
    let client = ScriptedClient::new(vec![Step::Json(upstream_body.clone())]);
    let executor = build_executor(
        vec![("default", vec!["openai.gpt-x.default"])],
        vec![provider_config("openai", ProviderType::Openai)],
        vec![("openai.gpt-x.default", client)],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Hi"}]}),
            false,
        ))
        .await;

    assert_eq!(result.status, 200);
    assert!(result
        .headers
        .iter()
        .any(|(name, _)| name == "x-request-id"));
    match result.body {
        ExecBody::Json(body) => assert_eq!(body, upstream_body),
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_inbound_served_by_responses_upstream_streams_chat_sse() {
    let frames = vec![
        "event: response.created\ndata: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"created_at\":5}}\n\n".to_string(),
        "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\"He\"}\n\n".to_string(),
        "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\"llo\"}\n\n".to_string(),
        "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\" world\"}\n\n".to_string(),
        "event: response.completed\ndata: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":1,\"output_tokens\":3}}}\n\n".to_string(),
        "event: response.done\ndata: {\"type\":\"response.done\"}\n\n".to_string(),
    ];
    let client = ScriptedClient::new(vec![Step::Sse(frames)]);
    let executor = build_executor(
        vec![("default", vec!["resp.gpt-5.1.default"])],
        vec![provider_config("resp", ProviderType::Responses)],
        vec![("resp.gpt-5.1.default", client)],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-5.1", "messages": [{"role": "user", "content": "Hi"}], "stream": true}),
            true,
        ))
        .await;

    assert_eq!(result.status, 200);
    let text = collect_stream(result.body).await;
    assert!(text.contains(r#""content":"He""#));
    assert!(text.contains(r#""content":"llo""#));
    assert!(text.contains(r#""content":" world""#));
    assert!(text.ends_with("data: [DONE]\n\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn anthropic_inbound_served_by_chat_upstream() {
    let client = ScriptedClient::new(vec![Step::Json(json!({
        "id": "chatcmpl-9",
        "model": "gpt-x",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))]);
    let executor = build_executor(
        vec![("default", vec!["openai.gpt-x.default"])],
        vec![provider_config("openai", ProviderType::Openai)],
        vec![("openai.gpt-x.default", client)],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(InboundRequest {
            endpoint: EntryEndpoint::Messages,
            headers: Vec::new(),
            body: json!({
                "model": "claude-3",
                "max_tokens": 64,
                "messages": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}]
            }),
            metadata: RequestMetadata::default(),
        })
        .await;

    assert_eq!(result.status, 200);
    match result.body {
        ExecBody::Json(body) => {
            assert_eq!(body["type"], "message");
            assert_eq!(body["content"][0]["text"], "Hello");
            assert_eq!(body["stop_reason"], "end_turn");
            assert_eq!(body["model"], "claude-3");
        }
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limited_attempt_rotates_to_next_pool_member() {
    let limited = ScriptedClient::new(vec![Step::Fail(GatewayError::rate_limited("slow down"))]);
    let healthy = ScriptedClient::new(vec![Step::Json(json!({
        "id": "chatcmpl-2",
        "model": "gpt-x",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "from B"},
            "finish_reason": "stop"
        }]
    }))]);
    let limited_calls = limited.calls.clone();
    let healthy_calls = healthy.calls.clone();

    let executor = build_executor(
        vec![(
            "default",
            vec!["a.gpt-x.default", "b.gpt-x.default", "c.gpt-x.default"],
        )],
        vec![
            provider_config("a", ProviderType::Openai),
            provider_config("b", ProviderType::Openai),
            provider_config("c", ProviderType::Openai),
        ],
        vec![
            ("a.gpt-x.default", limited),
            ("b.gpt-x.default", healthy),
            (
                "c.gpt-x.default",
                ScriptedClient::new(vec![Step::Fail(GatewayError::internal("unused"))]),
            ),
        ],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Hi"}]}),
            false,
        ))
        .await;

    assert_eq!(result.status, 200);
    match result.body {
        ExecBody::Json(body) => {
            assert_eq!(body["choices"][0]["message"]["content"], "from B");
        }
        _ => panic!("expected json"),
    }
    assert_eq!(limited_calls.load(Ordering::SeqCst), 1);
    assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_are_bounded_by_max_attempts() {
    let always_limited = ScriptedClient::new(vec![
        Step::Fail(GatewayError::rate_limited("1")),
        Step::Fail(GatewayError::rate_limited("2")),
        Step::Fail(GatewayError::rate_limited("3")),
        Step::Fail(GatewayError::rate_limited("4")),
    ]);
    let calls = always_limited.calls.clone();
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![("a.gpt-x.default", always_limited)],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Hi"}]}),
            false,
        ))
        .await;

    assert_eq!(result.status, 429);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn context_length_errors_do_not_retry() {
    let client = ScriptedClient::new(vec![Step::Fail(
        GatewayError::new(
            routecodex_common::ErrorKind::ContextLengthExceeded,
            "maximum context length exceeded",
        ),
    )]);
    let calls = client.calls.clone();
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![("a.gpt-x.default", client)],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Hi"}]}),
            false,
        ))
        .await;

    assert_eq!(result.status, 400);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_pool_is_503_no_target() {
    let executor = build_executor(
        vec![("default", vec![])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": []}),
            false,
        ))
        .await;
    assert_eq!(result.status, 503);
    match result.body {
        ExecBody::Json(body) => assert_eq!(body["error"]["type"], "no_target"),
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_tool_outputs_without_conversation_is_422() {
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![],
        Settings::default(),
    )
    .await;

    let result = executor
        .execute(InboundRequest {
            endpoint: EntryEndpoint::SubmitToolOutputs {
                response_id: "abc".to_string(),
            },
            headers: Vec::new(),
            body: json!({"tool_outputs": [{"tool_call_id": "t1", "output": "7"}]}),
            metadata: RequestMetadata::default(),
        })
        .await;

    assert_eq!(result.status, 422);
    match result.body {
        ExecBody::Json(body) => {
            assert_eq!(body["error"]["code"], "responses_resume_failed");
            assert_eq!(body["origin"], "client");
        }
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_tool_call_can_be_resumed() {
    // First turn: chat upstream asks for a tool. Second turn: final answer.
    let client = ScriptedClient::new(vec![
        Step::Json(json!({
            "id": "chatcmpl-77",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "t1", "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"meaning\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })),
        Step::Json(json!({
            "id": "chatcmpl-78",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "42"},
                "finish_reason": "stop"
            }]
        })),
    ]);
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![("a.gpt-x.default", client)],
        Settings::default(),
    )
    .await;

    let first = executor
        .execute(InboundRequest {
            endpoint: EntryEndpoint::Responses,
            headers: Vec::new(),
            body: json!({"model": "gpt-x", "input": "what is the meaning?"}),
            metadata: RequestMetadata::default(),
        })
        .await;
    assert_eq!(first.status, 200);
    let response_id = match first.body {
        ExecBody::Json(body) => {
            assert_eq!(body["status"], "requires_action");
            body["id"].as_str().unwrap().to_string()
        }
        _ => panic!("expected json"),
    };

    let second = executor
        .execute(InboundRequest {
            endpoint: EntryEndpoint::SubmitToolOutputs {
                response_id: response_id.clone(),
            },
            headers: Vec::new(),
            body: json!({"tool_outputs": [{"tool_call_id": "t1", "output": "42"}]}),
            metadata: RequestMetadata::default(),
        })
        .await;
    assert_eq!(second.status, 200);
    match second.body {
        ExecBody::Json(body) => {
            assert_eq!(body["output"][0]["content"][0]["text"], "42");
            assert_eq!(body["status"], "completed");
        }
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_tool_loop_executes_whitelisted_tools() {
    let client = ScriptedClient::new(vec![
        Step::Json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "c1", "type": "function",
                        "function": {"name": "echo", "arguments": "{\"text\":\"pong\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })),
        Step::Json(json!({
            "id": "chatcmpl-2",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "tool said pong"},
                "finish_reason": "stop"
            }]
        })),
    ]);
    let calls = client.calls.clone();
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![("a.gpt-x.default", client)],
        Settings {
            tool_server_exec: true,
            ..Settings::default()
        },
    )
    .await;

    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "ping"}]}),
            false,
        ))
        .await;

    assert_eq!(result.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match result.body {
        ExecBody::Json(body) => {
            assert_eq!(body["choices"][0]["message"]["content"], "tool said pong");
        }
        _ => panic!("expected json"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn synthesized_stream_from_json_upstream() {
    let client = ScriptedClient::new(vec![Step::Json(json!({
        "id": "chatcmpl-1",
        "model": "gpt-x",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello world"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
    }))]);
    let executor = build_executor(
        vec![("default", vec!["a.gpt-x.default"])],
        vec![provider_config("a", ProviderType::Openai)],
        vec![("a.gpt-x.default", client)],
        Settings::default(),
    )
    .await;

    // Mock-style upstreams answer JSON even when the client wants SSE; the
    // executor synthesizes the stream.
    let result = executor
        .execute(chat_request(
            json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Hi"}], "stream": true}),
            true,
        ))
        .await;

    assert_eq!(result.status, 200);
    let text = collect_stream(result.body).await;
    assert!(text.contains(r#""content":"Hello ""#));
    assert!(text.contains(r#""content":"world""#));
    assert!(text.ends_with("data: [DONE]\n\n"));
}
