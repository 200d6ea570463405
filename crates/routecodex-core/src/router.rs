use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use routecodex_common::ProviderKey;
use serde_json::Value as JsonValue;

use crate::config::RoutingConfig;

/// Classifies requests into logical routes and deals out pool members
/// round-robin. Reconfiguration swaps the snapshot and resets cursors.
pub struct VirtualRouter {
    config: ArcSwap<RoutingConfig>,
    cursors: std::sync::Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub route_name: String,
    pub key: ProviderKey,
}

impl VirtualRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            cursors: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingConfig> {
        self.config.load_full()
    }

    pub fn reconfigure(&self, config: RoutingConfig) {
        self.config.store(Arc::new(config));
        self.cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Route name for a request body. A metadata hint wins over the
    /// classifier; rules only fire for routes the config actually has.
    pub fn route(&self, body: &JsonValue, hint: Option<&str>) -> String {
        let config = self.config.load();

        if let Some(hint) = hint {
            if config.has_route(hint) {
                return hint.to_string();
            }
        }

        for candidate in ["tools", "thinking", "longcontext"] {
            if config.has_route(candidate) && rule_matches(candidate, body, &config) {
                return candidate.to_string();
            }
        }
        config.default_route.clone()
    }

    /// Next pool member for a route, advancing the per-route cursor. The
    /// pick observes one consistent `(pool, index)` snapshot.
    pub fn pick(&self, route: &str) -> Option<RouteDecision> {
        let config = self.config.load();
        let pool = config.pool(route).filter(|pool| !pool.is_empty())?;

        let cursor = {
            let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
            cursors.entry(route.to_string()).or_default().clone()
        };
        let index = cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(RouteDecision {
            route_name: route.to_string(),
            key: pool[index].clone(),
        })
    }

    /// Pool sizes and cursor positions, for `/status`.
    pub fn cursor_report(&self) -> Vec<(String, usize, usize)> {
        let config = self.config.load();
        let cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let mut report: Vec<(String, usize, usize)> = config
            .routes
            .iter()
            .map(|(route, pool)| {
                let position = cursors
                    .get(route)
                    .map(|cursor| cursor.load(Ordering::Relaxed))
                    .unwrap_or(0);
                (route.clone(), pool.len(), position)
            })
            .collect();
        report.sort();
        report
    }
}

fn rule_matches(route: &str, body: &JsonValue, config: &RoutingConfig) -> bool {
    match route {
        "tools" => body
            .get("tools")
            .and_then(|v| v.as_array())
            .map(|tools| !tools.is_empty())
            .unwrap_or(false),
        "thinking" => {
            body.get("thinking").is_some()
                || body.get("reasoning_effort").is_some()
                || body.get("reasoning").is_some()
        }
        "longcontext" => estimate_chars(body) > config.long_context_threshold,
        _ => false,
    }
}

/// Cheap request-size estimate over message/input text.
fn estimate_chars(body: &JsonValue) -> usize {
    let mut total = 0;
    let containers = ["messages", "input", "contents"];
    for container in containers {
        if let Some(items) = body.get(container).and_then(|v| v.as_array()) {
            for item in items {
                total += value_chars(item.get("content").unwrap_or(item));
            }
        }
    }
    if let Some(text) = body.get("input").and_then(|v| v.as_str()) {
        total += text.len();
    }
    total
}

fn value_chars(value: &JsonValue) -> usize {
    match value {
        JsonValue::String(text) => text.len(),
        JsonValue::Array(items) => items.iter().map(value_chars).sum(),
        JsonValue::Object(object) => object.values().map(value_chars).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn config() -> RoutingConfig {
        let mut routes = HashMap::new();
        routes.insert(
            "default".to_string(),
            vec!["openai.gpt-x.default".parse().unwrap()],
        );
        routes.insert(
            "tools".to_string(),
            vec![
                "openai.gpt-x.default".parse().unwrap(),
                "anthropic.claude-3.default".parse().unwrap(),
            ],
        );
        routes.insert(
            "longcontext".to_string(),
            vec!["anthropic.claude-3.default".parse().unwrap()],
        );
        RoutingConfig {
            routes,
            providers: Vec::new(),
            default_route: "default".to_string(),
            long_context_threshold: 100,
        }
    }

    #[test]
    fn tools_request_routes_to_tools_pool() {
        let router = VirtualRouter::new(config());
        let route = router.route(
            &json!({"tools": [{"type": "function"}], "messages": []}),
            None,
        );
        assert_eq!(route, "tools");
    }

    #[test]
    fn hint_wins_over_classifier() {
        let router = VirtualRouter::new(config());
        let route = router.route(
            &json!({"tools": [{"type": "function"}]}),
            Some("longcontext"),
        );
        assert_eq!(route, "longcontext");
    }

    #[test]
    fn unknown_hint_falls_back_to_classifier() {
        let router = VirtualRouter::new(config());
        let route = router.route(&json!({"messages": []}), Some("ghost"));
        assert_eq!(route, "default");
    }

    #[test]
    fn long_bodies_route_to_longcontext() {
        let router = VirtualRouter::new(config());
        let long_text = "x".repeat(200);
        let route = router.route(
            &json!({"messages": [{"role": "user", "content": long_text}]}),
            None,
        );
        assert_eq!(route, "longcontext");
    }

    #[test]
    fn round_robin_is_fair() {
        let router = VirtualRouter::new(config());
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let decision = router.pick("tools").unwrap();
            *counts.entry(decision.key.provider_id).or_default() += 1;
        }
        assert_eq!(counts["openai"], 5);
        assert_eq!(counts["anthropic"], 5);
    }

    #[test]
    fn reconfigure_resets_cursors() {
        let router = VirtualRouter::new(config());
        router.pick("tools").unwrap();
        router.pick("tools").unwrap();
        router.pick("tools").unwrap();
        router.reconfigure(config());
        let decision = router.pick("tools").unwrap();
        assert_eq!(decision.key.provider_id, "openai");
    }

    #[test]
    fn empty_route_yields_none() {
        let router = VirtualRouter::new(config());
        assert!(router.pick("thinking").is_none());
    }
}
