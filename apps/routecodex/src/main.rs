use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use routecodex_auth::{AuthHome, OAuthLifecycle, SystemBrowser};
use routecodex_common::{Settings, TracingRecorder};
use routecodex_core::config::RoutingConfig;
use routecodex_core::{RequestExecutor, VirtualRouter};
use routecodex_provider::ProviderRuntime;
use routecodex_server::{ServerState, gateway_router};
use routecodex_switch::SwitchTable;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Cli::parse();
    let settings = Settings::from_env();

    let raw = std::fs::read(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let routing: RoutingConfig =
        serde_json::from_slice(&raw).context("parsing routing config")?;

    let home = AuthHome::default_home();
    let lifecycle = Arc::new(OAuthLifecycle::new(home.clone(), Arc::new(SystemBrowser)));
    let runtime = Arc::new(ProviderRuntime::new(
        routing.providers.clone(),
        settings.clone(),
        home,
        lifecycle,
    ));
    let router = Arc::new(VirtualRouter::new(routing));
    let executor = Arc::new(RequestExecutor::new(
        router,
        runtime.clone(),
        Arc::new(SwitchTable::new()),
        settings.clone(),
        Arc::new(TracingRecorder),
    ));

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let state = ServerState {
        executor,
        settings,
        shutdown: shutdown_tx,
    };

    let app = gateway_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "routecodex listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}
