use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use routecodex_common::ProviderKey;
use routecodex_protocol::Dialect;
use serde_json::Value as JsonValue;

const MAX_CONVERSATIONS: usize = 512;

/// Server-side state needed to resume a Responses conversation through
/// `submit_tool_outputs`: the outbound payload as sent plus the target that
/// served it.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub key: ProviderKey,
    pub outbound_dialect: Dialect,
    pub upstream_payload: JsonValue,
    pub original_body: JsonValue,
    /// call_ids the client still owes outputs for.
    pub pending_call_ids: Vec<String>,
}

/// Bounded in-memory store keyed by response id; oldest entries fall off.
#[derive(Debug, Default)]
pub struct ConversationStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<String>,
    states: HashMap<String, ConversationState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, response_id: String, state: ConversationState) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.states.insert(response_id.clone(), state).is_none() {
            inner.order.push_back(response_id);
        }
        while inner.order.len() > MAX_CONVERSATIONS {
            if let Some(evicted) = inner.order.pop_front() {
                inner.states.remove(&evicted);
            }
        }
    }

    pub fn take(&self, response_id: &str) -> Option<ConversationState> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = inner.states.remove(response_id)?;
        inner.order.retain(|id| id != response_id);
        Some(state)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .states
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
