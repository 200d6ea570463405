use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use routecodex_common::{RequestId, Settings};
use routecodex_core::request::{EntryEndpoint, ExecBody, InboundRequest, RequestMetadata};
use routecodex_core::RequestExecutor;
use routecodex_protocol::sse::{encode_comment, encode_openai_done, encode_sse};
use serde_json::{Value as JsonValue, json};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

/// Comment heartbeat between real SSE frames once the stream is live.
const MID_STREAM_HEARTBEAT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ServerState {
    pub executor: Arc<RequestExecutor>,
    pub settings: Settings,
    pub shutdown: watch::Sender<bool>,
}

pub fn gateway_router(state: ServerState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/v1/responses", post(responses))
        .route(
            "/v1/responses/{id}/submit_tool_outputs",
            post(submit_tool_outputs),
        )
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/debug/pipelines", get(debug_pipelines))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, EntryEndpoint::ChatCompletions, headers, body).await
}

async fn messages(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    handle(state, EntryEndpoint::Messages, headers, body).await
}

async fn responses(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    handle(state, EntryEndpoint::Responses, headers, body).await
}

async fn submit_tool_outputs(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(
        state,
        EntryEndpoint::SubmitToolOutputs { response_id: id },
        headers,
        body,
    )
    .await
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({"status": "ok"}))
}

async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    let report = state.executor.router().cursor_report();
    let routes: Vec<JsonValue> = report
        .into_iter()
        .map(|(route, pool_size, cursor)| {
            json!({"route": route, "pool_size": pool_size, "cursor": cursor})
        })
        .collect();
    axum::Json(json!({"status": "ok", "routes": routes}))
}

/// Routing table dump with provider auth material withheld.
async fn debug_pipelines(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.executor.router().snapshot();
    let routes: serde_json::Map<String, JsonValue> = snapshot
        .routes
        .iter()
        .map(|(route, pool)| {
            let keys: Vec<String> = pool.iter().map(|key| key.to_string()).collect();
            (route.clone(), json!(keys))
        })
        .collect();
    let providers: Vec<JsonValue> = snapshot
        .providers
        .iter()
        .map(|provider| {
            json!({
                "provider_id": provider.provider_id,
                "provider_type": provider.provider_type.as_str(),
                "endpoint": provider.endpoint,
            })
        })
        .collect();
    axum::Json(json!({
        "default_route": snapshot.default_route,
        "routes": routes,
        "providers": providers,
    }))
}

/// Local-only; refused from any non-loopback peer.
async fn shutdown(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !peer.ip().is_loopback() {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": {"message": "shutdown is local-only", "type": "forbidden"}})),
        )
            .into_response();
    }
    let _ = state.shutdown.send(true);
    axum::Json(json!({"status": "shutting down"})).into_response()
}

async fn handle(
    state: ServerState,
    endpoint: EntryEndpoint,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: JsonValue = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({
                    "error": {"message": format!("invalid json: {err}"), "type": "bad_request", "code": 400}
                })),
            )
                .into_response();
        }
    };

    // `/v1/responses` streams by default; the others only on request.
    let default_stream = matches!(endpoint, EntryEndpoint::Responses);
    let wants_sse = sse_intent(&headers, &body).unwrap_or(default_stream);

    let metadata = RequestMetadata {
        request_id: header_value(&headers, "x-request-id").map(|v| RequestId::from_header(&v)),
        route_hint: header_value(&headers, "x-routecodex-route"),
        stream: wants_sse,
        session_id: header_value(&headers, "x-session-id"),
        conversation_id: header_value(&headers, "x-conversation-id"),
        retry_attempt: 0,
    };

    let request = InboundRequest {
        endpoint: endpoint.clone(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
        metadata,
    };

    if wants_sse {
        serve_sse(state, endpoint, request).await
    } else {
        let result = state.executor.execute(request).await;
        into_http(result)
    }
}

/// SSE responses start immediately: preflight heartbeat comments flow while
/// the executor works, then the real frames, with keep-alive comments
/// whenever the upstream goes quiet.
async fn serve_sse(state: ServerState, endpoint: EntryEndpoint, request: InboundRequest) -> Response {
    let heartbeat = state.settings.stream_heartbeat;
    let executor = state.executor.clone();
    let (tx, rx) = mpsc::channel::<Bytes>(32);

    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let exec = executor.execute(request);
        tokio::pin!(exec);

        let result = loop {
            tokio::select! {
                result = &mut exec => break result,
                _ = tokio::time::sleep(heartbeat) => {
                    let comment = encode_comment(&format!(
                        "pre-heartbeat {}",
                        started.elapsed().as_millis()
                    ));
                    if tx.send(comment).await.is_err() {
                        return;
                    }
                }
            }
        };

        match result.body {
            ExecBody::Stream(mut stream) => loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(frame)) => {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            for frame in sse_error_frames(&endpoint, &err.error_body()) {
                                let _ = tx.send(frame).await;
                            }
                            return;
                        }
                        None => return,
                    },
                    _ = tokio::time::sleep(MID_STREAM_HEARTBEAT) => {
                        if tx.send(encode_comment("keep-alive")).await.is_err() {
                            return;
                        }
                    }
                }
            },
            ExecBody::Json(body) => {
                // The executor only answers JSON to an SSE request when the
                // pipeline failed before streaming began.
                for frame in sse_error_frames(&endpoint, &body) {
                    let _ = tx.send(frame).await;
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, std::convert::Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn into_http(result: routecodex_core::ExecutionResult) -> Response {
    let mut builder = Response::builder().status(result.status);
    for (name, value) in &result.headers {
        builder = builder.header(name, value);
    }
    let response = match result.body {
        ExecBody::Json(body) => builder.body(Body::from(body.to_string())),
        ExecBody::Stream(stream) => {
            builder.body(Body::from_stream(stream.map(|chunk| {
                chunk.map_err(|err| std::io::Error::other(err.to_string()))
            })))
        }
    };
    response.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Error frames in the inbound dialect, terminator included.
fn sse_error_frames(endpoint: &EntryEndpoint, error_body: &JsonValue) -> Vec<Bytes> {
    match endpoint {
        EntryEndpoint::ChatCompletions => vec![
            encode_sse(None, &error_body.to_string()),
            encode_openai_done(),
        ],
        EntryEndpoint::Messages => vec![
            encode_sse(
                Some("error"),
                &json!({"type": "error", "error": error_body["error"]}).to_string(),
            ),
            encode_sse(Some("message_stop"), &json!({"type": "message_stop"}).to_string()),
        ],
        EntryEndpoint::Responses | EntryEndpoint::SubmitToolOutputs { .. } => vec![
            encode_sse(
                Some("response.error"),
                &json!({"type": "response.error", "error": error_body["error"]}).to_string(),
            ),
            encode_sse(
                Some("response.done"),
                &json!({"type": "response.done"}).to_string(),
            ),
        ],
    }
}

fn sse_intent(headers: &HeaderMap, body: &JsonValue) -> Option<bool> {
    if let Some(stream) = body.get("stream").and_then(|v| v.as_bool()) {
        return Some(stream);
    }
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())?;
    if accept.contains("text/event-stream") {
        return Some(true);
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .filter(|value| !value.is_empty())
}
