use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use routecodex_auth::flow::AuthType;
use routecodex_auth::{
    AuthDescriptor, AuthHome, EnsureOptions, NoBrowser, OAuthFlowConfig, OAuthLifecycle,
    StoredToken, TokenStore,
};

struct FakeIdp {
    refresh_hits: Arc<AtomicUsize>,
    userinfo_hits: Arc<AtomicUsize>,
    userinfo_status: u16,
}

async fn spawn_idp(userinfo_status: u16) -> (String, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let refresh_hits = Arc::new(AtomicUsize::new(0));
    let userinfo_hits = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(FakeIdp {
        refresh_hits: refresh_hits.clone(),
        userinfo_hits: userinfo_hits.clone(),
        userinfo_status,
    });

    let app = Router::new()
        .route(
            "/token",
            post(|State(state): State<Arc<FakeIdp>>| async move {
                state.refresh_hits.fetch_add(1, Ordering::SeqCst);
                // Small delay so concurrent callers overlap.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                axum::Json(serde_json::json!({
                    "access_token": "fresh-token",
                    "refresh_token": "next-refresh",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                }))
            }),
        )
        .route(
            "/userinfo",
            get(|State(state): State<Arc<FakeIdp>>| async move {
                state.userinfo_hits.fetch_add(1, Ordering::SeqCst);
                let status = axum::http::StatusCode::from_u16(state.userinfo_status).unwrap();
                (
                    status,
                    axum::Json(serde_json::json!({"api_key": "sk-stable", "email": "u@example.com"})),
                )
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, refresh_hits, userinfo_hits)
}

fn descriptor(base: &str, token_file: PathBuf, alias: &str) -> AuthDescriptor {
    AuthDescriptor {
        auth_type: AuthType::OAuth,
        token_file,
        alias: alias.to_string(),
        flow: OAuthFlowConfig {
            token_url: Some(format!("{base}/token")),
            user_info_url: Some(format!("{base}/userinfo")),
            client_id: Some("client-1".to_string()),
            ..Default::default()
        },
    }
}

fn expired_token() -> StoredToken {
    StoredToken {
        access_token: "stale".to_string(),
        refresh_token: Some("r".to_string()),
        expires_at: Some(routecodex_auth::token::now_ms() - 1000),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_refreshes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, refresh_hits, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("openai", "default");
    let store = TokenStore::new();
    store.save(&path, &expired_token()).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path.clone(), "default");
    let token = lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(token.access_token, "fresh-token");
    assert!(token.expires_at.unwrap() > routecodex_auth::token::now_ms());
    assert_eq!(refresh_hits.load(Ordering::SeqCst), 1);

    let on_disk = store.load(&path).unwrap();
    assert_eq!(on_disk.access_token, "fresh-token");
    assert_eq!(on_disk.refresh_token.as_deref(), Some("next-refresh"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_ensures_share_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, refresh_hits, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("openai", "default");
    TokenStore::new().save(&path, &expired_token()).unwrap();

    let lifecycle = Arc::new(OAuthLifecycle::new(home, Arc::new(NoBrowser)));
    let auth = descriptor(&base, path, "default");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let lifecycle = lifecycle.clone();
        let auth = auth.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .ensure_valid("openai", &auth, EnsureOptions::default())
                .await
        }));
    }
    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.access_token, "fresh-token");
    }
    assert_eq!(refresh_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn throttle_suppresses_rechecks_within_a_minute() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, refresh_hits, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("openai", "default");
    TokenStore::new().save(&path, &expired_token()).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path.clone(), "default");

    lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap();
    // Make the stored token stale again: the throttle alone must prevent a
    // second refresh.
    TokenStore::new().save(&path, &expired_token()).unwrap();
    lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(refresh_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn qwen_userinfo_404_falls_back_to_access_token() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, _, userinfo_hits) = spawn_idp(404).await;

    let path = home.resolve_token_file("qwen", "default");
    let valid = StoredToken {
        access_token: "qwen-at".to_string(),
        expires_at: Some(routecodex_auth::token::now_ms() + 3_600_000),
        ..Default::default()
    };
    TokenStore::new().save(&path, &valid).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path.clone(), "default");
    let token = lifecycle
        .ensure_valid("qwen", &auth, EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(userinfo_hits.load(Ordering::SeqCst), 1);
    assert_eq!(token.api_key.as_deref(), Some("qwen-at"));
}

#[tokio::test(flavor = "multi_thread")]
async fn qwen_userinfo_provides_stable_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, _, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("qwen", "default");
    let valid = StoredToken {
        access_token: "qwen-at".to_string(),
        expires_at: Some(routecodex_auth::token::now_ms() + 3_600_000),
        ..Default::default()
    };
    TokenStore::new().save(&path, &valid).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path.clone(), "default");
    let token = lifecycle
        .ensure_valid("qwen", &auth, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(token.api_key.as_deref(), Some("sk-stable"));
    assert_eq!(token.email.as_deref(), Some("u@example.com"));
}

#[tokio::test(flavor = "multi_thread")]
async fn static_alias_never_refreshes() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, refresh_hits, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("openai", "static");
    TokenStore::new().save(&path, &expired_token()).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path, "static");
    let token = lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap();
    assert_eq!(token.access_token, "stale");
    assert_eq!(refresh_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn norefresh_token_reports_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, refresh_hits, _) = spawn_idp(200).await;

    let path = home.resolve_token_file("openai", "default");
    let mut token = expired_token();
    token.norefresh = true;
    TokenStore::new().save(&path, &token).unwrap();

    let lifecycle = OAuthLifecycle::new(home, Arc::new(NoBrowser));
    let auth = descriptor(&base, path, "default");
    let err = lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, routecodex_auth::AuthError::Unsupported(_)));
    assert_eq!(refresh_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_without_browser_is_interactive_required() {
    let dir = tempfile::tempdir().unwrap();
    let home = AuthHome::new(dir.path());
    let (base, _, _) = spawn_idp(200).await;

    let lifecycle = OAuthLifecycle::new(home.clone(), Arc::new(NoBrowser));
    let auth = descriptor(&base, home.resolve_token_file("openai", "default"), "default");
    let err = lifecycle
        .ensure_valid("openai", &auth, EnsureOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        routecodex_auth::AuthError::InteractiveRequired(_)
    ));
}
