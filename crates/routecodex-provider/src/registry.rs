use std::collections::HashMap;
use std::sync::Arc;

use routecodex_auth::flow::AuthType;
use routecodex_auth::{AuthDescriptor, AuthHome, OAuthLifecycle};
use routecodex_common::{GatewayError, ProviderKey, Settings};
use tokio::sync::{Mutex, RwLock};

use crate::client::ProviderClient;
use crate::config::{ProviderAuth, ProviderConfig, ProviderType};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::mock::MockProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::responses::ResponsesProvider;

/// Owns initialized provider clients keyed by `ProviderKey`.
///
/// Clients are constructed lazily on first use under a per-key gate;
/// subsequent lookups are plain read-lock hits. `shutdown` runs every
/// client's cleanup.
pub struct ProviderRuntime {
    configs: HashMap<String, ProviderConfig>,
    settings: Settings,
    home: AuthHome,
    lifecycle: Arc<OAuthLifecycle>,
    clients: RwLock<HashMap<ProviderKey, Arc<dyn ProviderClient>>>,
    init_gates: Mutex<HashMap<ProviderKey, Arc<Mutex<()>>>>,
}

impl ProviderRuntime {
    pub fn new(
        configs: impl IntoIterator<Item = ProviderConfig>,
        settings: Settings,
        home: AuthHome,
        lifecycle: Arc<OAuthLifecycle>,
    ) -> Self {
        Self {
            configs: configs
                .into_iter()
                .map(|config| (config.provider_id.clone(), config))
                .collect(),
            settings,
            home,
            lifecycle,
            clients: RwLock::new(HashMap::new()),
            init_gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.configs.get(provider_id)
    }

    pub fn lifecycle(&self) -> &Arc<OAuthLifecycle> {
        &self.lifecycle
    }

    /// Auth descriptor for a key's provider, or `None` for api-key and
    /// unauthenticated providers.
    pub fn auth_descriptor(&self, key: &ProviderKey) -> Option<AuthDescriptor> {
        let config = self.configs.get(&key.provider_id)?;
        let ProviderAuth::OAuth { alias } = &config.auth else {
            return None;
        };
        let token_file = self
            .home
            .resolve_token_file(config.provider_type.as_str(), alias);
        Some(AuthDescriptor {
            auth_type: AuthType::OAuth,
            token_file,
            alias: alias.clone(),
            flow: config.oauth.clone().unwrap_or_default(),
        })
    }

    pub async fn handle(
        &self,
        key: &ProviderKey,
    ) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        if let Some(client) = self.clients.read().await.get(key) {
            return Ok(client.clone());
        }

        let gate = {
            let mut gates = self.init_gates.lock().await;
            gates.entry(key.clone()).or_default().clone()
        };
        let _guard = gate.lock().await;

        // Another caller may have won the race while we waited.
        if let Some(client) = self.clients.read().await.get(key) {
            return Ok(client.clone());
        }

        let config = self
            .configs
            .get(&key.provider_id)
            .ok_or_else(|| {
                GatewayError::no_target(format!("no provider configured as {}", key.provider_id))
            })?
            .clone();

        let client = self.build(config, key)?;
        client.initialize().await?;
        self.clients.write().await.insert(key.clone(), client.clone());
        Ok(client)
    }

    fn build(
        &self,
        config: ProviderConfig,
        key: &ProviderKey,
    ) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        let auth = self.auth_descriptor(key);
        let client: Arc<dyn ProviderClient> = match config.provider_type {
            ProviderType::Openai
            | ProviderType::Iflow
            | ProviderType::Qwen
            | ProviderType::Glm => Arc::new(OpenAiProvider::new(config, auth)),
            ProviderType::Responses => Arc::new(ResponsesProvider::new(config, auth)),
            ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config, auth)),
            ProviderType::Gemini | ProviderType::GeminiCli | ProviderType::Antigravity => {
                Arc::new(GeminiProvider::new(config, key.model_id.clone(), auth))
            }
            ProviderType::Mock => Arc::new(MockProvider::new(config, &self.settings)),
        };
        Ok(client)
    }

    /// Test and bootstrap hook: install a pre-built client for a key.
    pub async fn install(&self, key: ProviderKey, client: Arc<dyn ProviderClient>) {
        self.clients.write().await.insert(key, client);
    }

    pub async fn shutdown(&self) {
        let clients: Vec<Arc<dyn ProviderClient>> = {
            let mut guard = self.clients.write().await;
            guard.drain().map(|(_, client)| client).collect()
        };
        for client in clients {
            client.cleanup().await;
        }
    }
}
