//! Local OAuth callback listener
//!
//! A single-route axum server on a loopback port. The first redirect from the
//! authorization server decides the outcome: either the authorization code is
//! delivered on the code slot, or an error on the error slot. Each slot is a
//! one-shot channel and fires at most once per listener.
//!
//! `CallbackServer` owns the serving tasks, one per loopback family. Dropping
//! it (or calling `shutdown`) stops them and releases the port.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::{CALLBACK_PATH, CALLBACK_PORT_RANGE};
use crate::error::{Error, Result};

/// How long `shutdown` waits for in-flight responses before aborting the task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Query parameters of the provider redirect. Empty values count as absent.
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    state: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Sending halves shared with the route handler.
pub struct CallbackSlots {
    expected_state: String,
    code_tx: Mutex<Option<oneshot::Sender<String>>>,
    error_tx: Mutex<Option<oneshot::Sender<Error>>>,
}

impl CallbackSlots {
    async fn deliver_code(&self, code: String) {
        if let Some(tx) = self.code_tx.lock().await.take() {
            let _ = tx.send(code);
        } else {
            debug!("authorization code already delivered, ignoring repeat callback");
        }
    }

    async fn deliver_error(&self, error: Error) {
        if let Some(tx) = self.error_tx.lock().await.take() {
            let _ = tx.send(error);
        } else {
            debug!(%error, "callback error already reported, ignoring");
        }
    }
}

/// Receiving halves, consumed by the waiting login flow.
pub struct CallbackReceivers {
    pub code: oneshot::Receiver<String>,
    pub error: oneshot::Receiver<Error>,
}

/// Create the code and error slots for a listener bound to `expected_state`.
pub fn callback_channel(expected_state: String) -> (Arc<CallbackSlots>, CallbackReceivers) {
    let (code_tx, code_rx) = oneshot::channel();
    let (error_tx, error_rx) = oneshot::channel();
    let slots = Arc::new(CallbackSlots {
        expected_state,
        code_tx: Mutex::new(Some(code_tx)),
        error_tx: Mutex::new(Some(error_tx)),
    });
    (
        slots,
        CallbackReceivers {
            code: code_rx,
            error: error_rx,
        },
    )
}

/// Build the router serving `GET /callback`.
pub fn build_callback_router(slots: Arc<CallbackSlots>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(slots)
}

/// GET /callback: validate the redirect and hand the outcome to the flow.
///
/// The state check runs first, so a forged redirect never delivers a code
/// even when it carries one.
async fn handle_callback(
    State(slots): State<Arc<CallbackSlots>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if params.state != slots.expected_state {
        warn!("OAuth callback state mismatch");
        slots.deliver_error(Error::StateMismatch).await;
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed: state mismatch. You can close this window.",
        );
    }

    if !params.error.is_empty() {
        warn!(error = %params.error, "authorization server reported an error");
        slots
            .deliver_error(Error::Provider {
                error: params.error,
                description: params.error_description,
            })
            .await;
        return page(
            StatusCode::OK,
            "Authentication failed. You can close this window.",
        );
    }

    if params.code.is_empty() {
        slots.deliver_error(Error::MissingCode).await;
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed: no authorization code received.",
        );
    }

    slots.deliver_code(params.code).await;
    page(
        StatusCode::OK,
        "Authentication successful! You can close this window.",
    )
}

fn page(status: StatusCode, message: &str) -> Response {
    (status, Html(render_page(message))).into_response()
}

fn render_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Kamui CLI</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background-color: #f5f5f5;
        }}
        .container {{
            text-align: center;
            padding: 40px;
            background: white;
            border-radius: 8px;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
        }}
        h1 {{ color: #333; margin-bottom: 10px; }}
        p {{ color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Kamui CLI</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#
    )
}

/// Loopback listeners bound to one callback port.
///
/// The redirect URI names `localhost`, which browsers may resolve to either
/// family, so `::1` is held alongside `127.0.0.1` whenever the host has IPv6.
pub struct CallbackListener {
    port: u16,
    v4: StdTcpListener,
    v6: Option<StdTcpListener>,
}

impl CallbackListener {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Bind the first port in `start..start + CALLBACK_PORT_RANGE` free on every loopback family.
///
/// The bound listeners are returned rather than closed, so the port cannot be
/// taken by another process between the search and serving. Dropping them
/// releases the port.
pub fn find_available_port(start: u16) -> Result<CallbackListener> {
    let end = start.saturating_add(CALLBACK_PORT_RANGE - 1);
    for port in start..=end {
        let v4 = match StdTcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => listener,
            Err(e) => {
                debug!(port, error = %e, "callback port unavailable");
                continue;
            }
        };
        match StdTcpListener::bind((Ipv6Addr::LOCALHOST, port)) {
            Ok(v6) => {
                debug!(port, "bound callback port on both loopback families");
                return Ok(CallbackListener {
                    port,
                    v4,
                    v6: Some(v6),
                });
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                debug!(port, "callback port taken on ::1");
            }
            Err(e) => {
                debug!(port, error = %e, "no IPv6 loopback, serving 127.0.0.1 only");
                return Ok(CallbackListener { port, v4, v6: None });
            }
        }
    }
    Err(Error::NoAvailablePort {
        start,
        end: end.saturating_add(1),
    })
}

/// A running callback listener. Shut down on `shutdown` or drop.
pub struct CallbackServer {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl CallbackServer {
    /// Serve `router` on already bound listeners. Must run inside a tokio runtime.
    pub fn start(listener: CallbackListener, router: Router) -> Result<Self> {
        let CallbackListener { port, v4, v6 } = listener;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Built first so an error below aborts tasks already spawned
        let mut server = Self {
            port,
            shutdown_tx,
            handles: Vec::with_capacity(2),
        };
        for std_listener in std::iter::once(v4).chain(v6) {
            std_listener
                .set_nonblocking(true)
                .map_err(|e| Error::CallbackServer(format!("configuring listener: {e}")))?;
            let listener = tokio::net::TcpListener::from_std(std_listener)
                .map_err(|e| Error::CallbackServer(format!("registering listener: {e}")))?;

            let router = router.clone();
            let mut stop = shutdown_rx.clone();
            server.handles.push(tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.wait_for(|stopped| *stopped).await;
                    })
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "callback server stopped with error");
                }
            }));
        }

        debug!(port, listeners = server.handles.len(), "callback server listening");
        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting, let in-flight responses finish, then release the port.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut handle in std::mem::take(&mut self.handles) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(port = self.port, "callback server did not drain in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        debug!(port = self.port, "callback server stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}
