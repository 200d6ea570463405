use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use routecodex_common::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
}

static CLIENT_CACHE: OnceLock<Mutex<HashMap<ClientKey, wreq::Client>>> = OnceLock::new();

/// Process-wide client cache keyed by outbound proxy; connection pools are
/// shared across providers with the same egress.
pub fn shared_client(proxy: Option<&str>) -> Result<wreq::Client, GatewayError> {
    let key = ClientKey {
        proxy: normalize_proxy(proxy),
    };

    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| GatewayError::internal("http client cache lock failed"))?;

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }

    let client = build_client(key.proxy.as_deref())?;
    guard.insert(key, client.clone());
    Ok(client)
}

fn build_client(proxy: Option<&str>) -> Result<wreq::Client, GatewayError> {
    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = proxy {
        builder = builder.proxy(
            wreq::Proxy::all(proxy_url).map_err(|err| GatewayError::internal(err.to_string()))?,
        );
    }
    builder
        .build()
        .map_err(|err| GatewayError::internal(err.to_string()))
}

fn normalize_proxy(value: Option<&str>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}
