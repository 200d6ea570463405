use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::sync::{Mutex, oneshot};

use crate::error::{AuthError, AuthResult};

/// What the loopback listener resolved to.
#[derive(Debug)]
pub enum CallbackOutcome {
    Code { code: String, state: String },
    Cancelled,
    Denied(String),
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

struct CallbackState {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

/// Loopback HTTP listener for `http://127.0.0.1:<port>/oauth2callback`.
///
/// Binds an ephemeral port; resolves exactly once. A request whose `state`
/// does not match is rejected as CSRF without consuming the listener. The
/// server task ends when the handle is dropped.
pub struct CallbackServer {
    port: u16,
    receiver: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CallbackServer {
    pub async fn bind(expected_state: &str) -> AuthResult<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|err| AuthError::Io(err.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|err| AuthError::Io(err.to_string()))?
            .port();

        let (sender, receiver) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = Arc::new(CallbackState {
            expected_state: expected_state.to_string(),
            sender: Mutex::new(Some(sender)),
        });

        let app = Router::new()
            .route("/oauth2callback", get(handle_callback))
            .with_state(state);

        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                tracing::debug!(error = %err, "oauth callback server ended");
            }
        });

        Ok(Self {
            port,
            receiver: Some(receiver),
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/oauth2callback", self.port)
    }

    /// Wait for the browser round-trip to complete.
    pub async fn wait(mut self) -> AuthResult<CallbackOutcome> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| AuthError::Io("oauth callback already consumed".to_string()))?;
        receiver
            .await
            .map_err(|_| AuthError::Io("oauth callback listener dropped".to_string()))
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Ask a previous instance's callback server (port from the lock file) to
/// cancel so this process can take over the interactive lock.
pub async fn cancel_existing(port: u16) {
    let url =
        format!("http://127.0.0.1:{port}/oauth2callback?error=cancelled_by_new_auth");
    let client = wreq::Client::new();
    let _ = client.get(url).send().await;
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> Html<String> {
    if let Some(error) = query.error {
        let outcome = if error == "cancelled_by_new_auth" {
            CallbackOutcome::Cancelled
        } else {
            CallbackOutcome::Denied(query.error_description.unwrap_or(error))
        };
        resolve(&state, outcome).await;
        return page("Authorization did not complete. You can close this tab.", false);
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return page("Missing code or state.", false);
    };
    if returned_state != state.expected_state {
        // State mismatch is CSRF; keep waiting for the legitimate redirect.
        tracing::warn!("oauth callback state mismatch rejected");
        return page("State mismatch.", false);
    }

    resolve(
        &state,
        CallbackOutcome::Code {
            code,
            state: returned_state,
        },
    )
    .await;
    page("Authorization complete. You can close this tab.", true)
}

fn page(message: &str, success: bool) -> Html<String> {
    let auto_close = success
        && std::env::var("ROUTECODEX_OAUTH_AUTO_CLOSE_BROWSER")
            .map(|value| !value.is_empty() && value != "0" && value != "false")
            .unwrap_or(false);
    let script = if auto_close {
        "<script>setTimeout(() => window.close(), 500)</script>"
    } else {
        ""
    };
    Html(format!("<html><body>{message}{script}</body></html>"))
}

async fn resolve(state: &CallbackState, outcome: CallbackOutcome) {
    if let Some(sender) = state.sender.lock().await.take() {
        let _ = sender.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_resolves_on_matching_state() {
        let server = CallbackServer::bind("st_1").await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/oauth2callback?code=abc&state=st_1",
            server.port()
        );
        tokio::spawn(async move {
            let _ = wreq::Client::new().get(url).send().await;
        });
        match server.wait().await.unwrap() {
            CallbackOutcome::Code { code, state } => {
                assert_eq!(code, "abc");
                assert_eq!(state, "st_1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_and_listener_survives() {
        let server = CallbackServer::bind("expected").await.unwrap();
        let port = server.port();
        tokio::spawn(async move {
            let client = wreq::Client::new();
            let _ = client
                .get(format!(
                    "http://127.0.0.1:{port}/oauth2callback?code=evil&state=forged"
                ))
                .send()
                .await;
            let _ = client
                .get(format!(
                    "http://127.0.0.1:{port}/oauth2callback?code=good&state=expected"
                ))
                .send()
                .await;
        });
        match server.wait().await.unwrap() {
            CallbackOutcome::Code { code, .. } => assert_eq!(code, "good"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_request_resolves_cancelled() {
        let server = CallbackServer::bind("st").await.unwrap();
        let port = server.port();
        tokio::spawn(async move {
            cancel_existing(port).await;
        });
        assert!(matches!(
            server.wait().await.unwrap(),
            CallbackOutcome::Cancelled
        ));
    }
}
