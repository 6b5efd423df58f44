//! Local HTTP server used as release feed and asset host in tests.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
struct Routes {
    responses: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>,
    hits: Arc<Mutex<Vec<String>>>,
}

/// Serves canned responses keyed by request path (and query, if present).
///
/// Unknown paths answer `404`. The server stops when dropped.
pub struct ReleaseServer {
    addr: SocketAddr,
    routes: Routes,
    handle: JoinHandle<()>,
}

impl ReleaseServer {
    /// Bind to an ephemeral port on localhost and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let routes = Routes::default();
        let app = Router::new().fallback(respond).with_state(routes.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("Failed to bind test server: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("Failed to read test server address: {e}"));

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            routes,
            handle,
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Answer `path` with `status` and `body`.
    pub fn set(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), (status, body.into()));
    }

    /// Publish a release as the `latest` release of `owner/repo`.
    ///
    /// Every asset is served from `/assets/<name>`; the feed entry advertises
    /// its size.
    pub fn publish_release(&self, owner: &str, repo: &str, tag: &str, assets: &[(&str, Vec<u8>)]) {
        let listed: Vec<_> = assets
            .iter()
            .map(|(name, data)| {
                let path = format!("/assets/{name}");
                self.set(&path, 200, data.clone());
                json!({
                    "name": name,
                    "browser_download_url": self.url(&path),
                    "size": data.len(),
                })
            })
            .collect();

        let release = json!({
            "tag_name": tag,
            "name": tag,
            "body": format!("Release notes for {tag}"),
            "draft": false,
            "prerelease": false,
            "assets": listed,
        });
        self.set(
            &format!("/repos/{owner}/{repo}/releases/latest"),
            200,
            release.to_string(),
        );
    }

    /// Paths requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.routes.hits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Drop for ReleaseServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(State(routes): State<Routes>, uri: Uri) -> Response {
    let full = uri.path_and_query().map_or_else(|| uri.path().to_string(), |pq| pq.to_string());
    routes.hits.lock().unwrap_or_else(PoisonError::into_inner).push(full.clone());

    let responses = routes.responses.lock().unwrap_or_else(PoisonError::into_inner);
    let Some((status, body)) = responses.get(&full).or_else(|| responses.get(uri.path())) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Body::from(body.clone())).into_response()
}
