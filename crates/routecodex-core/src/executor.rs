use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use rand::Rng;
use routecodex_auth::{AuthError, RepairMode};
use routecodex_common::{
    ErrorKind, GatewayError, ProviderKey, RequestId, SharedRecorder, Settings, Stage,
};
use routecodex_protocol::Dialect;
use routecodex_protocol::sse::{SseParser, encode_openai_done, encode_sse};
use routecodex_provider::{ByteStream, ProviderData, ProviderRuntime};
use routecodex_switch::{StreamOut, SwitchTable, synth};
use serde_json::{Value as JsonValue, json};
use tokio_stream::wrappers::ReceiverStream;

use crate::convo::{ConversationState, ConversationStore};
use crate::request::{EntryEndpoint, ExecBody, ExecutionResult, InboundRequest};
use crate::router::VirtualRouter;
use crate::tools;

const UPSTREAM_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Orchestrates one inbound request end to end: classify, pick a target,
/// ensure credentials, rewrite, invoke, convert, retry.
pub struct RequestExecutor {
    router: Arc<VirtualRouter>,
    runtime: Arc<ProviderRuntime>,
    switches: Arc<SwitchTable>,
    settings: Settings,
    recorder: SharedRecorder,
    conversations: Arc<ConversationStore>,
}

impl RequestExecutor {
    pub fn new(
        router: Arc<VirtualRouter>,
        runtime: Arc<ProviderRuntime>,
        switches: Arc<SwitchTable>,
        settings: Settings,
        recorder: SharedRecorder,
    ) -> Self {
        Self {
            router,
            runtime,
            switches,
            settings,
            recorder,
            conversations: Arc::new(ConversationStore::new()),
        }
    }

    pub fn router(&self) -> &Arc<VirtualRouter> {
        &self.router
    }

    pub fn runtime(&self) -> &Arc<ProviderRuntime> {
        &self.runtime
    }

    pub async fn execute(&self, mut request: InboundRequest) -> ExecutionResult {
        let request_id = request
            .metadata
            .request_id
            .clone()
            .unwrap_or_else(RequestId::generate);
        request.metadata.request_id = Some(request_id.clone());

        self.recorder.record(
            Stage::HttpRequest,
            &request_id,
            json!({"endpoint": format!("{:?}", request.endpoint), "stream": request.metadata.stream}),
        );

        let result = match &request.endpoint {
            EntryEndpoint::SubmitToolOutputs { response_id } => {
                let response_id = response_id.clone();
                self.resume_conversation(&request, &request_id, &response_id)
                    .await
            }
            _ => self.run_pipeline(&mut request, &request_id).await,
        };

        match result {
            Ok(mut ok) => {
                ok.headers
                    .push(("x-request-id".to_string(), request_id.to_string()));
                self.recorder.record(
                    Stage::HttpResponse,
                    &request_id,
                    json!({"status": ok.status}),
                );
                ok
            }
            Err(err) => {
                self.recorder.record(
                    Stage::HttpResponse,
                    &request_id,
                    json!({"status": err.status.as_u16(), "kind": err.kind.code()}),
                );
                let mut body = err.error_body();
                if self.settings.error_verbose {
                    body["error"]["verbose"] = json!(err.message);
                }
                ExecutionResult {
                    status: err.status.as_u16(),
                    headers: vec![
                        ("content-type".to_string(), "application/json".to_string()),
                        ("x-request-id".to_string(), request_id.to_string()),
                    ],
                    body: ExecBody::Json(body),
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &mut InboundRequest,
        request_id: &RequestId,
    ) -> Result<ExecutionResult, GatewayError> {
        let inbound = request.endpoint.dialect();
        let route = self
            .router
            .route(&request.body, request.metadata.route_hint.as_deref());

        let mut attempt: u32 = 0;
        let mut last_error: Option<GatewayError> = None;

        loop {
            attempt += 1;
            request.metadata.retry_attempt = attempt - 1;

            let Some(decision) = self.router.pick(&route) else {
                return Err(last_error.unwrap_or_else(|| {
                    GatewayError::no_target(format!("route {route} has an empty pool"))
                }));
            };
            let key = decision.key;
            self.recorder.record(
                Stage::RoutingSelected,
                request_id,
                json!({"route": route, "target": key.to_string(), "attempt": attempt}),
            );

            match self
                .attempt_once(request, request_id, inbound, &key, attempt)
                .await
            {
                Ok(result) => {
                    if self.settings.usage_log {
                        tracing::info!(
                            request_id = request_id.as_str(),
                            route,
                            target = %key,
                            attempt,
                            "request completed"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => {
                    self.recorder.record(
                        Stage::ProviderError,
                        request_id,
                        json!({"target": key.to_string(), "kind": err.kind.code(), "message": err.message}),
                    );

                    self.after_failure(&key, &err).await;

                    // Timeouts get a single retry; everything else runs to
                    // the provider's attempt ceiling.
                    let max_attempts = if err.kind == ErrorKind::Timeout {
                        2
                    } else {
                        self.runtime
                            .config(&key.provider_id)
                            .map(|config| config.provider_type.max_attempts())
                            .unwrap_or(3)
                    };
                    if err.kind == ErrorKind::ForbiddenVerification
                        || !err.retryable
                        || attempt >= max_attempts
                    {
                        return Err(err);
                    }

                    let backoff = backoff_with_jitter(attempt);
                    tracing::debug!(
                        target = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying after failure"
                    );
                    tokio::time::sleep(backoff).await;
                    last_error = Some(err);
                }
            }
        }
    }

    /// One pipeline attempt against one concrete target.
    async fn attempt_once(
        &self,
        request: &InboundRequest,
        request_id: &RequestId,
        inbound: Dialect,
        key: &ProviderKey,
        attempt: u32,
    ) -> Result<ExecutionResult, GatewayError> {
        let handle = self.runtime.handle(key).await?;
        let config = self
            .runtime
            .config(&key.provider_id)
            .ok_or_else(|| GatewayError::no_target(format!("no config for {}", key.provider_id)))?;
        let outbound = config.provider_type.outbound_protocol();

        if let Some(auth) = self.runtime.auth_descriptor(key) {
            let opts = routecodex_auth::EnsureOptions {
                force_reacquire_if_refresh_fails: false,
                open_browser: false,
                force_reauthorize: self.settings.oauth_force_reauth,
            };
            self.runtime
                .lifecycle()
                .ensure_valid(config.provider_type.as_str(), &auth, opts)
                .await
                .map_err(map_auth_error)?;
        }

        let switch = self
            .switches
            .get(inbound, outbound)
            .ok_or_else(|| {
                GatewayError::conversion(format!(
                    "no translator for {} -> {}",
                    inbound.as_str(),
                    outbound.as_str()
                ))
            })?;

        let mut upstream_payload = switch.translate_request(request.body.clone())?;
        if outbound != Dialect::GeminiChat {
            if let Some(object) = upstream_payload.as_object_mut() {
                object.insert("model".to_string(), json!(key.model_id));
            }
        }

        self.recorder.record(
            Stage::ProviderRequest,
            request_id,
            json!({"target": key.to_string(), "outbound": outbound.as_str(), "attempt": attempt}),
        );

        let want_stream = request.metadata.stream;
        let timeout = UPSTREAM_TIMEOUT_DEFAULT.min(self.settings.pipeline_max_wait);
        let response = tokio::time::timeout(
            timeout,
            handle.send_request(upstream_payload.clone(), want_stream),
        )
        .await
        .map_err(|_| GatewayError::timeout(format!("upstream call exceeded {timeout:?}")))??;

        self.recorder.record(
            Stage::ProviderResponse,
            request_id,
            json!({"target": key.to_string(), "status": response.status}),
        );

        match response.data {
            ProviderData::Stream(stream) => {
                if !want_stream {
                    return Err(GatewayError::conversion(
                        "upstream streamed where JSON was required",
                    ));
                }
                let transformer = switch.stream_transformer(&request.body);
                Ok(ExecutionResult::sse(pipe_stream(
                    stream,
                    transformer,
                    inbound,
                )))
            }
            ProviderData::Json(mut upstream_json) => {
                if self.settings.tool_server_exec && outbound == Dialect::OpenaiChat {
                    upstream_json = self
                        .maybe_run_tool_loop(&handle, upstream_payload.clone(), upstream_json)
                        .await?;
                }

                let body = switch.translate_response(upstream_json.clone(), &request.body)?;

                if self.settings.usage_log {
                    if let Some(usage) = routecodex_protocol::usage::usage_from_value(&body) {
                        tracing::info!(
                            request_id = request_id.as_str(),
                            target = %key,
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "upstream usage"
                        );
                    }
                }

                if inbound == Dialect::OpenaiResponses {
                    self.remember_conversation(key, outbound, &upstream_payload, &upstream_json, request, &body);
                }

                if want_stream {
                    let frames = synth::synthesize_stream(inbound, &body);
                    Ok(ExecutionResult::sse(paced_stream(frames)))
                } else {
                    Ok(ExecutionResult::json(body))
                }
            }
        }
    }

    /// Server-side tool loop: execute whitelisted tool calls and run one
    /// follow-up turn. Non-whitelisted calls pass through untouched so the
    /// client can resume via submit_tool_outputs.
    async fn maybe_run_tool_loop(
        &self,
        handle: &Arc<dyn routecodex_provider::ProviderClient>,
        mut payload: JsonValue,
        response: JsonValue,
    ) -> Result<JsonValue, GatewayError> {
        let calls = tools::chat_tool_calls(&response);
        if calls.is_empty() || !calls.iter().all(|(_, name, _)| tools::is_whitelisted(name)) {
            return Ok(response);
        }

        let assistant = response
            .pointer("/choices/0/message")
            .cloned()
            .unwrap_or(json!({}));
        let messages = payload
            .get_mut("messages")
            .and_then(|v| v.as_array_mut())
            .ok_or_else(|| GatewayError::conversion("tool loop needs a messages payload"))?;
        messages.push(assistant);
        for (call_id, name, arguments) in &calls {
            let output = tools::execute(name, arguments).unwrap_or_default();
            messages.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": output,
            }));
        }

        let second = handle.send_request(payload, false).await?;
        match second.data {
            ProviderData::Json(value) => Ok(value),
            ProviderData::Stream(_) => Err(GatewayError::conversion(
                "tool loop follow-up streamed unexpectedly",
            )),
        }
    }

    /// Keep what a Responses client needs to resume through
    /// submit_tool_outputs.
    fn remember_conversation(
        &self,
        key: &ProviderKey,
        outbound: Dialect,
        upstream_payload: &JsonValue,
        upstream_json: &JsonValue,
        request: &InboundRequest,
        body: &JsonValue,
    ) {
        let pending: Vec<String> = body
            .get("output")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(|v| v.as_str()) == Some("function_call"))
                    .filter_map(|item| item.get("call_id").and_then(|v| v.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if pending.is_empty() {
            return;
        }
        let Some(response_id) = body.get("id").and_then(|v| v.as_str()) else {
            return;
        };

        // For a chat upstream the resume payload needs the assistant turn
        // with its tool_calls already appended.
        let mut resume_payload = upstream_payload.clone();
        if outbound == Dialect::OpenaiChat {
            if let Some(assistant) = upstream_json.pointer("/choices/0/message") {
                if let Some(messages) =
                    resume_payload.get_mut("messages").and_then(|v| v.as_array_mut())
                {
                    messages.push(assistant.clone());
                }
            }
        }

        self.conversations.insert(
            response_id.to_string(),
            ConversationState {
                key: key.clone(),
                outbound_dialect: outbound,
                upstream_payload: resume_payload,
                original_body: request.body.clone(),
                pending_call_ids: pending,
            },
        );
    }

    /// `/v1/responses/:id/submit_tool_outputs` resume turn.
    async fn resume_conversation(
        &self,
        request: &InboundRequest,
        request_id: &RequestId,
        response_id: &str,
    ) -> Result<ExecutionResult, GatewayError> {
        if response_id.trim().is_empty() {
            return Err(resume_client_error("missing response_id"));
        }
        let outputs = request
            .body
            .get("tool_outputs")
            .and_then(|v| v.as_array())
            .ok_or_else(|| resume_client_error("missing tool_outputs"))?;
        if outputs.is_empty() {
            return Err(resume_client_error("tool_outputs is empty"));
        }

        let Some(state) = self.conversations.take(response_id) else {
            return Err(resume_client_error(format!(
                "no conversation stored for {response_id}"
            )));
        };

        let mut payload = state.upstream_payload.clone();
        for output in outputs {
            let call_id = output
                .get("tool_call_id")
                .or_else(|| output.get("call_id"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| resume_client_error("tool output missing tool_call_id"))?;
            if !state.pending_call_ids.iter().any(|id| id == call_id) {
                return Err(resume_client_error(format!(
                    "tool_call_id {call_id} is not pending for this response"
                )));
            }
            let text = output
                .get("output")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            match state.outbound_dialect {
                Dialect::OpenaiChat => {
                    let messages = payload
                        .get_mut("messages")
                        .and_then(|v| v.as_array_mut())
                        .ok_or_else(|| GatewayError::conversion("stored payload lost messages"))?;
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": text,
                    }));
                }
                _ => {
                    let input = payload
                        .get_mut("input")
                        .and_then(|v| v.as_array_mut())
                        .ok_or_else(|| GatewayError::conversion("stored payload lost input"))?;
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": text,
                    }));
                }
            }
        }

        self.recorder.record(
            Stage::ProviderRequest,
            request_id,
            json!({"target": state.key.to_string(), "resume": response_id}),
        );

        let handle = self.runtime.handle(&state.key).await?;
        let response = handle.send_request(payload, false).await?;
        let upstream_json = match response.data {
            ProviderData::Json(value) => value,
            ProviderData::Stream(_) => {
                return Err(GatewayError::conversion("resume turn streamed unexpectedly"));
            }
        };
        self.recorder.record(
            Stage::ProviderResponse,
            request_id,
            json!({"target": state.key.to_string(), "status": response.status}),
        );

        let switch = self
            .switches
            .get(Dialect::OpenaiResponses, state.outbound_dialect)
            .ok_or_else(|| GatewayError::conversion("no translator for resume"))?;
        let body = switch.translate_response(upstream_json, &state.original_body)?;

        if request.metadata.stream {
            let frames = synth::synthesize_stream(Dialect::OpenaiResponses, &body);
            Ok(ExecutionResult::sse(paced_stream(frames)))
        } else {
            Ok(ExecutionResult::json(body))
        }
    }

    /// Post-failure hooks: kick OAuth repair for credential-invalid
    /// classes; verification failures also start repair but never retry.
    async fn after_failure(&self, key: &ProviderKey, err: &GatewayError) {
        if !matches!(
            err.kind,
            ErrorKind::InvalidToken | ErrorKind::ForbiddenVerification
        ) {
            return;
        }
        let Some(auth) = self.runtime.auth_descriptor(key) else {
            return;
        };
        let Some(config) = self.runtime.config(&key.provider_id) else {
            return;
        };
        let _ = self
            .runtime
            .lifecycle()
            .handle_upstream_invalid(
                config.provider_type.as_str(),
                &auth,
                &err.message,
                RepairMode::NonBlocking,
            )
            .await;
    }
}

fn resume_client_error(message: impl Into<String>) -> GatewayError {
    GatewayError::bad_request(message)
        .with_status(http::StatusCode::UNPROCESSABLE_ENTITY)
        .with_upstream_code("responses_resume_failed")
}

fn map_auth_error(err: AuthError) -> GatewayError {
    match &err {
        AuthError::AccountVerificationRequired(message) => {
            GatewayError::new(ErrorKind::ForbiddenVerification, message.clone())
        }
        AuthError::PortalUnavailable(message) => {
            GatewayError::new(ErrorKind::UpstreamSseError, message.clone())
        }
        AuthError::Unsupported(message) | AuthError::Io(message) => {
            GatewayError::internal(message.clone())
        }
        _ => GatewayError::invalid_token(err.to_string()),
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let base = BACKOFF_BASE * 2u32.saturating_pow(exponent);
    let jitter = rand::rng().random_range(0..100);
    base + Duration::from_millis(jitter)
}

/// Frames an inbound dialect uses to report an error after the stream has
/// already started, terminator included.
fn error_frames(dialect: Dialect, err: &GatewayError) -> Vec<Bytes> {
    let body = err.error_body();
    match dialect {
        Dialect::OpenaiChat => vec![
            encode_sse(None, &body.to_string()),
            encode_openai_done(),
        ],
        Dialect::OpenaiResponses => vec![
            encode_sse(
                Some("response.error"),
                &json!({"type": "response.error", "error": body["error"]}).to_string(),
            ),
            encode_sse(Some("response.done"), &json!({"type": "response.done"}).to_string()),
        ],
        Dialect::AnthropicMessages => vec![
            encode_sse(
                Some("error"),
                &json!({"type": "error", "error": body["error"]}).to_string(),
            ),
            encode_sse(Some("message_stop"), &json!({"type": "message_stop"}).to_string()),
        ],
        Dialect::GeminiChat => vec![encode_sse(None, &body.to_string())],
    }
}

/// Pipe an upstream SSE byte stream through a dialect transformer,
/// preserving receipt order. Errors inside the stream surface as an error
/// frame followed by the inbound terminator.
fn pipe_stream(
    mut upstream: ByteStream,
    mut transformer: Box<dyn routecodex_switch::StreamTransformer>,
    inbound: Dialect,
) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, GatewayError>>(32);

    tokio::spawn(async move {
        let mut parser = SseParser::new();

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in parser.push_bytes(&bytes) {
                        let outs = transformer.on_event(&event);
                        if !forward(outs, &tx, inbound).await {
                            return;
                        }
                    }
                }
                Err(err) => {
                    for frame in error_frames(inbound, &err) {
                        let _ = tx.send(Ok(frame)).await;
                    }
                    return;
                }
            }
        }
        for event in parser.finish() {
            let outs = transformer.on_event(&event);
            if !forward(outs, &tx, inbound).await {
                return;
            }
        }
        let outs = transformer.finish();
        let _ = forward(outs, &tx, inbound).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Push transformer outputs into the pipe; false ends the stream.
async fn forward(
    outs: Vec<StreamOut>,
    tx: &tokio::sync::mpsc::Sender<Result<Bytes, GatewayError>>,
    inbound: Dialect,
) -> bool {
    for out in outs {
        match out {
            StreamOut::Frame(frame) => {
                if tx.send(Ok(frame)).await.is_err() {
                    return false;
                }
            }
            StreamOut::Done => return false,
            StreamOut::Error(err) => {
                for frame in error_frames(inbound, &err) {
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                return false;
            }
        }
    }
    true
}

/// Stream pre-built frames with delta pacing, for synthesized SSE.
fn paced_stream(frames: Vec<Bytes>) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, GatewayError>>(32);
    tokio::spawn(async move {
        let pacing = Duration::from_millis(synth::SYNTH_DELTA_PACING_MS);
        let total = frames.len();
        for (index, frame) in frames.into_iter().enumerate() {
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
            // Pace the body frames; the terminators go out back to back.
            if index + 2 < total {
                tokio::time::sleep(pacing).await;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}
