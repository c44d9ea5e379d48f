//! Loopback HTTP server serving canned responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct StaticResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Held before answering.
    pub delay: Option<Duration>,
}

impl StaticResponse {
    pub fn json<T: Serialize>(value: &T) -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(value).unwrap_or_default(),
            delay: None,
        }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream".to_string(),
            body,
            delay: None,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: body.as_bytes().to_vec(),
            delay: None,
        }
    }

    /// Answer only after `delay` has passed.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn not_found() -> Self {
        Self::status(404, r#"{"object":"error","status":404}"#)
    }
}

impl IntoResponse for StaticResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

#[derive(Default)]
struct ServerState {
    routes: RwLock<HashMap<String, StaticResponse>>,
    hits: RwLock<Vec<String>>,
}

/// Loopback axum server for exercising the real HTTP client in tests.
///
/// Routes match on the request path with the query string stripped;
/// unrouted paths answer 404. Every request target is recorded.
///
/// # Example
///
/// ```rust,ignore
/// let server = StaticHttpServer::start().await?;
/// server.route("/cards/named", StaticResponse::json(&card)).await;
/// let remote = RemoteConfig { api_base_url: server.base_url(), ..Default::default() };
/// ```
pub struct StaticHttpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl StaticHttpServer {
    /// Bind an ephemeral loopback port and start serving.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());

        let app = Router::new()
            .fallback(serve_canned)
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "Static HTTP server stopped");
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub async fn route(&self, path: &str, response: StaticResponse) {
        self.state
            .routes
            .write()
            .await
            .insert(path.to_string(), response);
    }

    /// Request targets received so far, including query strings.
    pub async fn hits(&self) -> Vec<String> {
        self.state.hits.read().await.clone()
    }

    pub async fn hit_count(&self, path: &str) -> usize {
        self.state
            .hits
            .read()
            .await
            .iter()
            .filter(|target| strip_query(target) == path)
            .count()
    }
}

impl Drop for StaticHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn strip_query(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

async fn serve_canned(State(state): State<Arc<ServerState>>, uri: Uri) -> StaticResponse {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    state.hits.write().await.push(target);

    let response = state
        .routes
        .read()
        .await
        .get(uri.path())
        .cloned()
        .unwrap_or_else(StaticResponse::not_found);
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_routes_answer_and_record_hits() {
        let server = StaticHttpServer::start().await.unwrap();
        server
            .route("/cards/named", StaticResponse::json(&json!({"name": "Opt"})))
            .await;
        server
            .route("/busy", StaticResponse::status(503, "slow down"))
            .await;

        let client = reqwest::Client::new();
        let found = client
            .get(server.url("/cards/named?exact=Opt"))
            .send()
            .await
            .unwrap();
        assert_eq!(found.status(), 200);
        assert_eq!(
            found.headers()[reqwest::header::CONTENT_TYPE],
            "application/json"
        );
        let body: serde_json::Value = found.json().await.unwrap();
        assert_eq!(body["name"], "Opt");

        let busy = client.get(server.url("/busy")).send().await.unwrap();
        assert_eq!(busy.status(), 503);
        assert_eq!(busy.text().await.unwrap(), "slow down");

        let missing = client.get(server.url("/nothing")).send().await.unwrap();
        assert_eq!(missing.status(), 404);

        assert_eq!(
            server.hits().await,
            vec!["/cards/named?exact=Opt", "/busy", "/nothing"]
        );
        assert_eq!(server.hit_count("/cards/named").await, 1);
    }
}
