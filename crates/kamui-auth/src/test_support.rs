//! Mock Kamui authorization server for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use serde_json::Value;
use tokio::net::TcpListener;

use crate::flow::AuthorizeHandler;

#[derive(Default)]
struct Recorded {
    register: Mutex<Vec<Value>>,
    token: Mutex<Vec<HashMap<String, String>>>,
}

struct BackendState {
    register_response: (StatusCode, Value),
    token_response: (StatusCode, Value),
    recorded: Arc<Recorded>,
}

/// Real HTTP server on 127.0.0.1 answering `/oauth/register` and `/oauth/token`
/// with canned responses and recording what it received.
pub struct MockBackend {
    pub url: String,
    recorded: Arc<Recorded>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(register: (u16, Value), token: (u16, Value)) -> Self {
        let recorded = Arc::new(Recorded::default());
        let state = Arc::new(BackendState {
            register_response: (StatusCode::from_u16(register.0).unwrap(), register.1),
            token_response: (StatusCode::from_u16(token.0).unwrap(), token.1),
            recorded: recorded.clone(),
        });

        let app = Router::new()
            .route("/oauth/register", post(handle_register))
            .route("/oauth/token", post(handle_token))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            recorded,
            handle,
        }
    }

    pub fn register_requests(&self) -> Vec<Value> {
        self.recorded.register.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.recorded.token.lock().unwrap().clone()
    }

    pub fn token_call_count(&self) -> usize {
        self.recorded.token.lock().unwrap().len()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_register(
    State(state): State<Arc<BackendState>>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    state.recorded.register.lock().unwrap().push(body);
    let (status, body) = state.register_response.clone();
    (status, axum::Json(body))
}

async fn handle_token(
    State(state): State<Arc<BackendState>>,
    axum::Form(form): axum::Form<HashMap<String, String>>,
) -> impl IntoResponse {
    state.recorded.token.lock().unwrap().push(form);
    let (status, body) = state.token_response.clone();
    (status, axum::Json(body))
}

/// A port that was free a moment ago. Used as the start of the callback port search.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Authorize handler that plays the browser: records the URL, then follows
/// the redirect with the query built from the received state.
pub fn simulated_browser<Q>(query: Q, opened: Arc<Mutex<Vec<String>>>) -> AuthorizeHandler
where
    Q: Fn(&str) -> String + Send + Sync + 'static,
{
    Arc::new(move |auth_url: &str| {
        opened.lock().unwrap().push(auth_url.to_string());
        let parsed = reqwest::Url::parse(auth_url).unwrap();
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let redirect = reqwest::Url::parse(&params["redirect_uri"]).unwrap();
        let target = format!(
            "http://127.0.0.1:{}/callback?{}",
            redirect.port().unwrap(),
            query(&params["state"])
        );
        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
    })
}
