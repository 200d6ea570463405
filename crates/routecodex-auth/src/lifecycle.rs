use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::callback::{CallbackOutcome, CallbackServer, cancel_existing};
use crate::error::{AuthError, AuthResult};
use crate::flow::{AuthDescriptor, EnsureOptions, OAuthFlowConfig};
use crate::lock::InteractiveLock;
use crate::pkce;
use crate::repair::{RepairCooldown, RepairMode, should_trigger_interactive_repair};
use crate::store::{AuthHome, TokenStore};
use crate::token::{StoredToken, now_ms, sanitize};

const SUCCESS_THROTTLE: Duration = Duration::from_secs(60);
const EXPIRY_SKEW: Duration = Duration::from_secs(120);
const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);
const STATIC_ALIAS: &str = "static";

/// Opens URLs in the user's browser. Injected so tests and headless runs
/// can observe instead of spawning.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str);

    /// Hardened profile for account-verification pages.
    fn open_hardened(&self, url: &str) {
        self.open(url);
    }
}

pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) {
        let command = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        if std::process::Command::new(command).arg(url).spawn().is_err() {
            tracing::info!(%url, "open this URL to authorize");
        }
    }

    fn open_hardened(&self, url: &str) {
        if std::process::Command::new("camoufox").arg(url).spawn().is_ok() {
            return;
        }
        self.open(url);
    }
}

/// Logs URLs instead of opening anything; the default for tests.
pub struct NoBrowser;

impl BrowserOpener for NoBrowser {
    fn open(&self, url: &str) {
        tracing::info!(%url, "browser suppressed; open manually");
    }
}

/// Guarantees a valid credential behind a token file before a request
/// leaves for an OAuth-backed provider.
pub struct OAuthLifecycle {
    home: AuthHome,
    store: TokenStore,
    http: wreq::Client,
    browser: Arc<dyn BrowserOpener>,
    /// Per-cache-key singleflight gates.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Last successful ensure per cache key; suppresses re-checks for 60 s.
    throttle: StdMutex<HashMap<String, Instant>>,
    cooldown: RepairCooldown,
}

impl OAuthLifecycle {
    pub fn new(home: AuthHome, browser: Arc<dyn BrowserOpener>) -> Self {
        let cooldown = RepairCooldown::new(home.cooldown_path());
        Self {
            home,
            store: TokenStore::new(),
            http: wreq::Client::new(),
            browser,
            inflight: Mutex::new(HashMap::new()),
            throttle: StdMutex::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn home(&self) -> &AuthHome {
        &self.home
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    fn cache_key(provider_type: &str, token_file: &PathBuf) -> String {
        format!("{provider_type}:{}", token_file.display())
    }

    /// On success the file at `auth.token_file` holds a credential that is
    /// valid now. Concurrent callers with the same key share one underlying
    /// flow; successful runs suppress re-checks for 60 s.
    pub async fn ensure_valid(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
        opts: EnsureOptions,
    ) -> AuthResult<StoredToken> {
        if auth.alias == STATIC_ALIAS {
            return self.store.load(&auth.token_file).ok_or_else(|| {
                AuthError::Unsupported(format!(
                    "static alias has no token file at {}",
                    auth.token_file.display()
                ))
            });
        }

        let key = Self::cache_key(provider_type, &auth.token_file);
        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };
        let _guard = gate.lock().await;

        let bypass_throttle = opts.force_reauthorize || opts.open_browser;
        if !bypass_throttle && self.recently_succeeded(&key) {
            if let Some(token) = self.store.load(&auth.token_file) {
                return Ok(token);
            }
        }

        let result = self.ensure_valid_inner(provider_type, auth, opts).await;
        if result.is_ok() {
            self.mark_success(&key);
        }
        result
    }

    async fn ensure_valid_inner(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
        opts: EnsureOptions,
    ) -> AuthResult<StoredToken> {
        if provider_type == "iflow" {
            self.adopt_external_iflow_store(auth);
        }

        let token = self.store.load(&auth.token_file);

        if !opts.force_reauthorize {
            if let Some(token) = &token {
                if token.has_usable_secret() && !token.is_expired(EXPIRY_SKEW) {
                    return self.enrich(provider_type, auth, token.clone()).await;
                }
            }
        }

        let refresh_allowed = token
            .as_ref()
            .map(|t| !t.norefresh || opts.force_reauthorize)
            .unwrap_or(false);
        if let Some(token) = &token {
            if refresh_allowed && !opts.force_reauthorize {
                if let Some(refresh_token) = token.refresh_token.clone() {
                    match self
                        .refresh_grant(provider_type, &auth.flow, &refresh_token)
                        .await
                    {
                        Ok(mut refreshed) => {
                            if refreshed.refresh_token.is_none() {
                                refreshed.refresh_token = Some(refresh_token);
                            }
                            carry_identity(&mut refreshed, token);
                            let refreshed =
                                self.enrich(provider_type, auth, refreshed).await?;
                            self.persist(provider_type, auth, &refreshed)?;
                            return Ok(refreshed);
                        }
                        Err(err) => {
                            tracing::warn!(
                                provider = provider_type,
                                error = %err,
                                "token refresh failed"
                            );
                            if !(opts.force_reacquire_if_refresh_fails && opts.open_browser) {
                                return Err(AuthError::RefreshFailed(err.to_string()));
                            }
                        }
                    }
                }
            }
        }

        // No usable token, or refresh failed with reacquire requested.
        if token.as_ref().map(|t| t.norefresh).unwrap_or(false) && !opts.force_reauthorize {
            return Err(AuthError::Unsupported(
                "token is marked norefresh".to_string(),
            ));
        }
        if !opts.open_browser {
            return Err(AuthError::InteractiveRequired(format!(
                "{provider_type} credential at {} needs interactive authorization",
                auth.token_file.display()
            )));
        }
        self.interactive(provider_type, auth).await
    }

    fn recently_succeeded(&self, key: &str) -> bool {
        let throttle = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        throttle
            .get(key)
            .map(|at| at.elapsed() < SUCCESS_THROTTLE)
            .unwrap_or(false)
    }

    fn mark_success(&self, key: &str) {
        let mut throttle = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        throttle.insert(key.to_string(), Instant::now());
    }

    async fn refresh_grant(
        &self,
        provider_type: &str,
        flow: &OAuthFlowConfig,
        refresh_token: &str,
    ) -> AuthResult<StoredToken> {
        let token_url = flow
            .token_url
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("no token_url configured".to_string()))?;
        let client_id = flow.client_id.as_deref().unwrap_or_default();

        let mut body = format!(
            "grant_type=refresh_token&refresh_token={}&client_id={}",
            urlencoding::encode(refresh_token),
            urlencoding::encode(client_id),
        );
        if let Some(secret) = &flow.client_secret {
            body.push_str(&format!("&client_secret={}", urlencoding::encode(secret)));
        }

        let response = self
            .http
            .post(token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))?;

        if status >= 500 && provider_type == "iflow" {
            // iFlow's token endpoint 5xx means "come back later", not
            // "credential dead"; saturate the cooldown for five minutes.
            self.cooldown
                .impose(&format!("iflow-refresh:{token_url}"));
            return Err(AuthError::RefreshFailed(format!(
                "iflow token endpoint {status}"
            )));
        }
        if !(200..300).contains(&status) {
            let text = String::from_utf8_lossy(&bytes);
            return Err(AuthError::RefreshFailed(format!("{status} {text}")));
        }

        let raw: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))?;
        sanitize(raw).ok_or_else(|| {
            AuthError::RefreshFailed("token endpoint returned an unusable body".to_string())
        })
    }

    /// Provider-specific post-validation enrichment.
    async fn enrich(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
        token: StoredToken,
    ) -> AuthResult<StoredToken> {
        match provider_type {
            "qwen" => self.enrich_qwen(auth, token).await,
            "gemini-cli" | "antigravity" => self.enrich_gemini_cli(auth, token).await,
            _ => Ok(token),
        }
    }

    /// Qwen hands out short-lived access tokens but bills against a stable
    /// `api_key` fetched from userinfo. A 404 there means the deployment
    /// has no userinfo endpoint and the access token doubles as the key.
    async fn enrich_qwen(
        &self,
        auth: &AuthDescriptor,
        mut token: StoredToken,
    ) -> AuthResult<StoredToken> {
        let needs_key = token
            .api_key
            .as_deref()
            .map(|key| key.is_empty() || key == token.access_token)
            .unwrap_or(true);
        if !needs_key || token.access_token.is_empty() {
            return Ok(token);
        }
        let Some(user_info_url) = auth.flow.user_info_url.as_deref() else {
            return Ok(token);
        };

        let response = self
            .http
            .get(user_info_url)
            .header("Authorization", format!("Bearer {}", token.access_token))
            .send()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
        let status = response.status().as_u16();

        if status == 404 {
            token.api_key = Some(token.access_token.clone());
            self.store.save(&auth.token_file, &token)?;
            return Ok(token);
        }
        if !(200..300).contains(&status) {
            return Err(AuthError::PortalUnavailable(format!(
                "userinfo returned {status}"
            )));
        }

        let payload: JsonValue = response
            .json()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
        if let Some(api_key) = payload
            .get("api_key")
            .or_else(|| payload.pointer("/data/api_key"))
            .and_then(|v| v.as_str())
        {
            token.api_key = Some(api_key.to_string());
        }
        if let Some(email) = payload.get("email").and_then(|v| v.as_str()) {
            token.email = Some(email.to_string());
        }
        self.store.save(&auth.token_file, &token)?;
        Ok(token)
    }

    /// Gemini-CLI family: fetch userinfo and a default project, then try to
    /// enable the Cloud AI Companion service. Enablement failure is logged
    /// and ignored; real calls re-trigger repair if it mattered.
    async fn enrich_gemini_cli(
        &self,
        auth: &AuthDescriptor,
        mut token: StoredToken,
    ) -> AuthResult<StoredToken> {
        if token.project_id.is_some() && token.email.is_some() {
            return Ok(token);
        }
        let Some(user_info_url) = auth.flow.user_info_url.as_deref() else {
            return Ok(token);
        };

        if token.email.is_none() {
            if let Ok(response) = self
                .http
                .get(user_info_url)
                .header("Authorization", format!("Bearer {}", token.access_token))
                .send()
                .await
            {
                if let Ok(payload) = response.json::<JsonValue>().await {
                    if let Some(email) = payload.get("email").and_then(|v| v.as_str()) {
                        token.email = Some(email.to_string());
                    }
                }
            }
        }

        if token.project_id.is_none() {
            if let Some(project_id) = self.detect_gemini_project(&token).await {
                token.project_id = Some(project_id);
            }
        }
        if let Some(project_id) = token.project_id.clone() {
            self.try_enable_companion(&token, &project_id).await;
        }

        self.store.save_enveloped(&auth.token_file, &token)?;
        Ok(token)
    }

    async fn detect_gemini_project(&self, token: &StoredToken) -> Option<String> {
        let response = self
            .http
            .post("https://cloudcode-pa.googleapis.com/v1internal:loadCodeAssist")
            .header("Authorization", format!("Bearer {}", token.access_token))
            .header("Content-Type", "application/json")
            .body(b"{}".to_vec())
            .send()
            .await
            .ok()?;
        let payload: JsonValue = response.json().await.ok()?;
        payload
            .get("cloudaicompanionProject")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    async fn try_enable_companion(&self, token: &StoredToken, project_id: &str) {
        let url = format!(
            "https://serviceusage.googleapis.com/v1/projects/{project_id}/services/cloudaicompanion.googleapis.com:enable"
        );
        match self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", token.access_token))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    project = project_id,
                    status = response.status().as_u16(),
                    "cloudaicompanion enable failed; continuing"
                );
            }
            Err(err) => {
                tracing::warn!(project = project_id, error = %err, "cloudaicompanion enable failed; continuing");
            }
        }
    }

    /// Adopt a fresher valid token from an external iFlow credential store
    /// into the alias store.
    fn adopt_external_iflow_store(&self, auth: &AuthDescriptor) {
        let ours = self.store.load(&auth.token_file);
        let our_expiry = ours.as_ref().and_then(|t| t.expires_at).unwrap_or(0);

        for path in external_iflow_paths() {
            let Some(theirs) = self.store.load(&path) else {
                continue;
            };
            let their_expiry = theirs.expires_at.unwrap_or(0);
            if theirs.has_usable_secret()
                && their_expiry > now_ms()
                && their_expiry > our_expiry
            {
                if self.store.save(&auth.token_file, &theirs).is_ok() {
                    tracing::info!(from = %path.display(), "adopted external iflow credential");
                }
                return;
            }
        }
    }

    /// Browser-backed authorization code flow with PKCE. Serialized
    /// process-wide through the interactive file lock; a newer call cancels
    /// the previous callback listener for the same token path.
    async fn interactive(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
    ) -> AuthResult<StoredToken> {
        if let Some(existing) = InteractiveLock::info(&self.home.lock_path()) {
            if existing.token_file == auth.token_file.display().to_string() {
                if let Some(port) = existing.callback_port {
                    cancel_existing(port).await;
                }
            }
        }

        let state = pkce::generate_state();
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);

        let server = CallbackServer::bind(&state).await?;
        let lock = InteractiveLock::acquire(
            &self.home.lock_path(),
            &auth.token_file.display().to_string(),
            Some(server.port()),
        )?;

        let backup = self.store.backup(&auth.token_file)?;
        let result = self
            .run_authorization(provider_type, auth, server, &state, &verifier, &challenge)
            .await;

        match &result {
            Ok(_) => {
                if let Some(backup) = &backup {
                    let _ = self.store.discard(backup);
                }
            }
            Err(_) => {
                if let Some(backup) = &backup {
                    let _ = self.store.restore(backup, &auth.token_file);
                }
            }
        }
        lock.release()?;
        result
    }

    async fn run_authorization(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
        server: CallbackServer,
        state: &str,
        verifier: &str,
        challenge: &str,
    ) -> AuthResult<StoredToken> {
        let flow = &auth.flow;
        let authorization_url = flow.authorization_url.as_deref().ok_or_else(|| {
            AuthError::Unsupported(format!("{provider_type} has no authorization_url"))
        })?;
        let client_id = flow
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported(format!("{provider_type} has no client_id")))?;

        let redirect_uri = server.redirect_uri();
        let url = pkce::build_authorize_url(
            authorization_url,
            client_id,
            &redirect_uri,
            &flow.scopes,
            challenge,
            state,
        );
        self.browser.open(&url);

        let outcome = tokio::time::timeout(INTERACTIVE_TIMEOUT, server.wait())
            .await
            .map_err(|_| {
                AuthError::InteractiveRequired("authorization timed out".to_string())
            })??;

        let code = match outcome {
            CallbackOutcome::Code { code, .. } => code,
            CallbackOutcome::Cancelled => {
                return Err(AuthError::InteractiveRequired(
                    "authorization cancelled by a newer attempt".to_string(),
                ));
            }
            CallbackOutcome::Denied(reason) => {
                if crate::repair::is_account_verification_message(&reason) {
                    self.browser.open_hardened(authorization_url);
                    return Err(AuthError::AccountVerificationRequired(reason));
                }
                return Err(AuthError::InteractiveRequired(reason));
            }
        };

        let token = match self
            .exchange_code(flow, &code, verifier, &redirect_uri)
            .await
        {
            Ok(token) => token,
            Err(err) if provider_type == "iflow" && flow.supports_device_code => {
                tracing::warn!(error = %err, "iflow authorization_code failed; trying device_code");
                self.device_code_grant(flow).await?
            }
            Err(err) => return Err(err),
        };

        let token = self.enrich(provider_type, auth, token).await?;
        self.persist(provider_type, auth, &token)?;
        Ok(token)
    }

    /// Gemini-CLI family files carry the wrapping envelope; everyone else
    /// is flat.
    fn persist(
        &self,
        provider_type: &str,
        auth: &AuthDescriptor,
        token: &StoredToken,
    ) -> AuthResult<()> {
        match provider_type {
            "gemini-cli" | "antigravity" => self.store.save_enveloped(&auth.token_file, token),
            _ => self.store.save(&auth.token_file, token),
        }
    }

    async fn exchange_code(
        &self,
        flow: &OAuthFlowConfig,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> AuthResult<StoredToken> {
        let token_url = flow
            .token_url
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("no token_url configured".to_string()))?;
        let client_id = flow.client_id.as_deref().unwrap_or_default();

        let mut body = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&code_verifier={}",
            urlencoding::encode(code),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(client_id),
            urlencoding::encode(verifier),
        );
        if let Some(secret) = &flow.client_secret {
            body.push_str(&format!("&client_secret={}", urlencoding::encode(secret)));
        }

        let response = self
            .http
            .post(token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
        if !(200..300).contains(&status) {
            let text = String::from_utf8_lossy(&bytes);
            return Err(AuthError::InteractiveRequired(format!(
                "code exchange failed: {status} {text}"
            )));
        }
        let raw: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|err| AuthError::InteractiveRequired(err.to_string()))?;
        sanitize(raw).ok_or_else(|| {
            AuthError::InteractiveRequired("token endpoint returned an unusable body".to_string())
        })
    }

    /// RFC 8628 device flow, used as the iFlow fallback.
    async fn device_code_grant(&self, flow: &OAuthFlowConfig) -> AuthResult<StoredToken> {
        let device_url = flow
            .device_code_url
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("no device_code_url configured".to_string()))?;
        let token_url = flow
            .token_url
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("no token_url configured".to_string()))?;
        let client_id = flow.client_id.as_deref().unwrap_or_default();

        let response = self
            .http
            .post(device_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(format!("client_id={}", urlencoding::encode(client_id)))
            .send()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
        let payload: JsonValue = response
            .json()
            .await
            .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;

        let device_code = payload
            .get("device_code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::PortalUnavailable("missing device_code".to_string()))?
            .to_string();
        let interval = payload
            .get("interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .max(1);
        if let Some(uri) = payload.get("verification_uri_complete").and_then(|v| v.as_str()) {
            self.browser.open(uri);
        } else if let (Some(uri), Some(user_code)) = (
            payload.get("verification_uri").and_then(|v| v.as_str()),
            payload.get("user_code").and_then(|v| v.as_str()),
        ) {
            tracing::info!(%uri, %user_code, "enter the code at the verification URI");
            self.browser.open(uri);
        }

        let deadline = Instant::now() + INTERACTIVE_TIMEOUT;
        loop {
            if Instant::now() > deadline {
                return Err(AuthError::InteractiveRequired(
                    "device authorization timed out".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_secs(interval)).await;

            let body = format!(
                "grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={}&client_id={}",
                urlencoding::encode(&device_code),
                urlencoding::encode(client_id),
            );
            let response = self
                .http
                .post(token_url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .await
                .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;
            let status = response.status().as_u16();
            let payload: JsonValue = response
                .json()
                .await
                .map_err(|err| AuthError::PortalUnavailable(err.to_string()))?;

            if (200..300).contains(&status) {
                return sanitize(payload).ok_or_else(|| {
                    AuthError::InteractiveRequired(
                        "device token endpoint returned an unusable body".to_string(),
                    )
                });
            }
            match payload.get("error").and_then(|v| v.as_str()) {
                Some("authorization_pending") | Some("slow_down") => continue,
                Some(other) => {
                    return Err(AuthError::InteractiveRequired(format!(
                        "device authorization failed: {other}"
                    )));
                }
                None => {
                    return Err(AuthError::InteractiveRequired(format!(
                        "device authorization failed: {status}"
                    )));
                }
            }
        }
    }

    /// Triage after an upstream call failed with a credential-invalid
    /// signal. Non-blocking mode kicks off a background repair and returns
    /// immediately so the router can fail over.
    pub async fn handle_upstream_invalid(
        self: &Arc<Self>,
        provider_type: &str,
        auth: &AuthDescriptor,
        message: &str,
        mode: RepairMode,
    ) -> AuthResult<()> {
        if !should_trigger_interactive_repair(provider_type, message) {
            return Ok(());
        }
        let key = Self::cache_key(provider_type, &auth.token_file);
        let allowed = if provider_type == "iflow" {
            self.cooldown
                .try_begin_with_limit(&key, iflow_auto_max_attempts())
        } else {
            self.cooldown.try_begin(&key)
        };
        if !allowed {
            tracing::debug!(key, "oauth repair skipped: cooling down");
            return Ok(());
        }

        let opts = EnsureOptions {
            force_reacquire_if_refresh_fails: true,
            open_browser: mode == RepairMode::Blocking,
            force_reauthorize: false,
        };

        match mode {
            RepairMode::Blocking => {
                self.ensure_valid(provider_type, auth, opts).await.map(|_| ())
            }
            RepairMode::NonBlocking => {
                let lifecycle = Arc::clone(self);
                let provider_type_owned = provider_type.to_string();
                let provider_type = provider_type.to_string();
                let auth = auth.clone();
                tokio::spawn(async move {
                    if let Err(err) = lifecycle
                        .ensure_valid(&provider_type, &auth, opts)
                        .await
                    {
                        tracing::warn!(provider = provider_type, error = %err, "background oauth repair failed");
                    }
                });
                Err(AuthError::InteractiveRequired(format!(
                    "{provider_type_owned} credential invalid; repair started in background"
                )))
            }
        }
    }
}

/// Non-access fields that should survive a refresh grant.
fn carry_identity(refreshed: &mut StoredToken, previous: &StoredToken) {
    if refreshed.api_key.is_none() {
        refreshed.api_key = previous.api_key.clone();
    }
    if refreshed.project_id.is_none() {
        refreshed.project_id = previous.project_id.clone();
    }
    if refreshed.email.is_none() {
        refreshed.email = previous.email.clone();
    }
}

fn iflow_auto_max_attempts() -> u32 {
    std::env::var("ROUTECODEX_IFLOW_AUTO_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(3)
}

fn external_iflow_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(configured) = std::env::var_os("ROUTECODEX_IFLOW_CRED_PATHS") {
        for part in configured.to_string_lossy().split(':') {
            if !part.is_empty() {
                paths.push(PathBuf::from(part));
            }
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".iflow").join("oauth_creds.json"));
    }
    paths
}
