use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::ids::RequestId;

/// Pipeline stages a snapshot can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HttpRequest,
    RoutingSelected,
    ProviderRequest,
    ProviderResponse,
    ProviderError,
    HttpResponse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::HttpRequest => "http-request",
            Stage::RoutingSelected => "routing-selected",
            Stage::ProviderRequest => "provider-request",
            Stage::ProviderResponse => "provider-response",
            Stage::ProviderError => "provider-error",
            Stage::HttpResponse => "http-response",
        }
    }
}

/// Fire-and-forget observability sink. Implementations must never raise
/// into the caller and must not block the request path.
pub trait SnapshotRecorder: Send + Sync {
    fn record(&self, stage: Stage, request_id: &RequestId, data: JsonValue);
}

pub type SharedRecorder = Arc<dyn SnapshotRecorder>;

pub struct NoopRecorder;

impl SnapshotRecorder for NoopRecorder {
    fn record(&self, _stage: Stage, _request_id: &RequestId, _data: JsonValue) {}
}

/// Logs each snapshot at debug level; the default app recorder.
pub struct TracingRecorder;

impl SnapshotRecorder for TracingRecorder {
    fn record(&self, stage: Stage, request_id: &RequestId, data: JsonValue) {
        tracing::debug!(
            stage = stage.as_str(),
            request_id = request_id.as_str(),
            %data,
            "snapshot"
        );
    }
}
