use std::collections::HashMap;

use routecodex_common::ProviderKey;
use routecodex_provider::ProviderConfig;
use serde::{Deserialize, Serialize};

pub fn default_route_name() -> String {
    "default".to_string()
}

fn default_long_context_threshold() -> usize {
    60_000
}

/// Parsed routing table: logical route name -> ordered provider pool, plus
/// the provider definitions the pools reference. Replaced atomically on
/// reconfiguration; in-flight requests keep their snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub routes: HashMap<String, Vec<ProviderKey>>,
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_route_name")]
    pub default_route: String,
    /// Character-length estimate above which a request classifies as
    /// `longcontext`.
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: usize,
}

impl RoutingConfig {
    pub fn pool(&self, route: &str) -> Option<&[ProviderKey]> {
        self.routes.get(route).map(|pool| pool.as_slice())
    }

    pub fn has_route(&self, route: &str) -> bool {
        self.routes
            .get(route)
            .map(|pool| !pool.is_empty())
            .unwrap_or(false)
    }
}
