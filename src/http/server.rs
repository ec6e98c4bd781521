//! HTTP server for blob endpoints
//!
//! Every path is a blob key. GET streams, HEAD probes, POST/PUT store, DELETE removes,
//! OPTIONS advertises the supported methods.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use super::protocol::{allow_header_value, headers_only_body, upload_content_type, X_CACHE};
use crate::store::{BlobStore, Key};

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: BlobStore,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(store: BlobStore) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let blob_routes: MethodRouter<SharedState> = get(fetch_blob)
        .head(probe_blob)
        .post(store_blob)
        .put(store_blob)
        .delete(delete_blob)
        .options(blob_options);

    Router::new()
        .route("/", blob_routes.clone())
        .route("/{*resource}", blob_routes)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn start_server(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, draining connections...");
    })
    .await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Periodically log cache metrics
pub fn spawn_metrics_task(state: SharedState, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!(uptime_secs = state.started_at.elapsed().as_secs(), "Metrics");
            state.store.log_metrics();
        }
    })
}

/// GET: stream the blob, chunk by chunk as the producer appends
async fn fetch_blob(State(state): State<SharedState>, uri: Uri) -> Response {
    let key = Key::from_uri(&uri);
    match state.store.fetch(&key).await {
        Ok(fetched) => {
            debug!(key = %key, content_type = %fetched.content_type, "GET");
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, fetched.content_type)
                .header(X_CACHE, fetched.source.cache_header())
                .body(Body::from_stream(fetched.body))
                .unwrap_or_else(|e| {
                    error!(key = %key, error = %e, "Failed to build response");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
        }
        Err(e) => e.into_response(),
    }
}

/// HEAD: existence and content type only, with no length
async fn probe_blob(State(state): State<SharedState>, uri: Uri) -> Response {
    let key = Key::from_uri(&uri);
    match state.store.probe(&key).await {
        Ok(probe) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, probe.content_type)
            .header(X_CACHE, probe.source.cache_header())
            .body(headers_only_body())
            .unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Failed to build response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Err(e) => e.into_response(),
    }
}

/// POST / PUT: publish a new blob and copy the request body into it
async fn store_blob(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let key = Key::from_uri(&uri);
    let content_type = upload_content_type(&headers).to_string();

    match state
        .store
        .store(&key, &content_type, body.into_data_stream())
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE: drop the cache entry and the durable copy
async fn delete_blob(State(state): State<SharedState>, uri: Uri) -> Response {
    let key = Key::from_uri(&uri);
    match state.store.remove(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// OPTIONS: advertise supported methods
async fn blob_options() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::ALLOW, allow_header_value())],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BlobCache, MetadataCache};
    use crate::durable::testing::FailingStore;
    use crate::durable::{DiskStore, DurabilityBridge};
    use axum::http::{Method, Request};
    use bytes::Bytes;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use std::io;
    use tempfile::tempdir;
    use tokio::time::timeout;
    use tower::ServiceExt;

    const WAIT: Duration = Duration::from_secs(5);

    fn create_test_state() -> SharedState {
        Arc::new(ServerState::new(BlobStore::in_memory()))
    }

    async fn send(
        state: &SharedState,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &'static str,
    ) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        create_router(Arc::clone(state))
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_fetch_delete_scenario() {
        let state = create_test_state();

        let response = send(&state, Method::POST, "/a/b", Some("text/plain"), "hello").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&state, Method::GET, "/a/b", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"hello"));

        let response = send(&state, Method::DELETE, "/a/b", None, "").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&state, Method::GET, "/a/b", None, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&state, Method::DELETE, "/a/b", None, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probe() {
        let state = create_test_state();

        let response = send(&state, Method::HEAD, "/missing", None, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        send(&state, Method::PUT, "/img", Some("image/png"), "png-bytes").await;
        let response = send(&state, Method::HEAD, "/img", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_options() {
        let state = create_test_state();

        let response = send(&state, Method::OPTIONS, "/a/b", None, "").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let allow = response.headers()[header::ALLOW].to_str().unwrap();
        for method in ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS"] {
            assert!(allow.contains(method), "Allow header missing {}", method);
        }
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let state = create_test_state();

        send(&state, Method::POST, "/doc", Some("text/plain"), "v1").await;
        let response = send(&state, Method::PUT, "/doc", Some("text/markdown"), "v2").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&state, Method::GET, "/doc", None, "").await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/markdown");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_default_content_type() {
        let state = create_test_state();

        send(&state, Method::POST, "/raw", None, "bytes").await;
        let response = send(&state, Method::GET, "/raw", None, "").await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_root_path_is_a_key() {
        let state = create_test_state();

        send(&state, Method::POST, "/", Some("text/plain"), "root").await;
        let response = send(&state, Method::GET, "/", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"root"));
    }

    #[tokio::test]
    async fn test_persistence_failure_returns_500() {
        let store = BlobStore::new(
            BlobCache::new(None, true),
            MetadataCache::new(),
            DurabilityBridge::new(Arc::new(FailingStore)),
        );
        let state = Arc::new(ServerState::new(store));

        let response = send(&state, Method::POST, "/a", Some("text/plain"), "data").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Server keeps answering
        let response = send(&state, Method::GET, "/a", None, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fetch_from_disk_after_restart() {
        let dir = tempdir().unwrap();
        let disk_state = || {
            let disk = DiskStore::new(dir.path().to_path_buf()).unwrap();
            Arc::new(ServerState::new(BlobStore::new(
                BlobCache::new(None, true),
                MetadataCache::new(),
                DurabilityBridge::new(Arc::new(disk)),
            )))
        };

        let state = disk_state();
        send(&state, Method::POST, "/kept", Some("text/csv"), "a,b\n1,2\n").await;
        drop(state);

        let state = disk_state();
        let response = send(&state, Method::HEAD, "/kept", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "MISS");

        let response = send(&state, Method::GET, "/kept", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"a,b\n1,2\n"));

        let response = send(&state, Method::DELETE, "/kept", None, "").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&state, Method::HEAD, "/kept", None, "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn wait_until_resident(state: &SharedState, key: &Key) {
        for _ in 0..1000 {
            if state.store.probe(key).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("blob for {} never published", key);
    }

    /// Serve on an ephemeral port and return its address
    async fn spawn_server(state: SharedState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            serve(listener, state, std::future::pending()).await.unwrap();
        });
        (addr, handle)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_streaming_over_socket() {
        let state = create_test_state();
        let (addr, server) = spawn_server(Arc::clone(&state)).await;

        let key = Key::from("/live");
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, io::Error>>();
        let uploader = {
            let state = Arc::clone(&state);
            let key = key.clone();
            tokio::spawn(async move { state.store.store(&key, "text/plain", rx).await })
        };

        tx.unbounded_send(Ok(Bytes::from_static(b"chunk-1;"))).unwrap();
        wait_until_resident(&state, &key).await;

        let response = reqwest::get(format!("http://{}/live", addr)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "text/plain");
        let mut stream = response.bytes_stream();

        // The first chunk arrives while the upload is still open
        let mut received = Vec::new();
        while received.len() < 8 {
            let chunk = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"chunk-1;");

        tx.unbounded_send(Ok(Bytes::from_static(b"chunk-2"))).unwrap();
        drop(tx);

        while let Some(chunk) = timeout(WAIT, stream.next()).await.unwrap() {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"chunk-1;chunk-2");
        assert!(uploader.await.unwrap().is_ok());

        server.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_head_over_socket_sends_no_length() {
        let state = create_test_state();
        let (addr, server) = spawn_server(Arc::clone(&state)).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/big", addr);

        let response = client.put(&url).body("0123456789").send().await.unwrap();
        assert_eq!(response.status().as_u16(), 204);

        let response = client.head(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers()["x-cache"], "HIT");

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"0123456789"));

        server.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broken_upload_truncates_download_abnormally() {
        let state = create_test_state();
        let (addr, server) = spawn_server(Arc::clone(&state)).await;

        let key = Key::from("/x");
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, io::Error>>();
        let uploader = {
            let state = Arc::clone(&state);
            let key = key.clone();
            tokio::spawn(async move { state.store.store(&key, "text/plain", rx).await })
        };

        tx.unbounded_send(Ok(Bytes::from_static(b"partial"))).unwrap();
        wait_until_resident(&state, &key).await;

        let response = reqwest::get(format!("http://{}/x", addr)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let mut stream = response.bytes_stream();

        tx.unbounded_send(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "client went away",
        )))
        .unwrap();

        let mut saw_error = false;
        while let Some(item) = timeout(WAIT, stream.next()).await.unwrap() {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "download ended cleanly despite broken upload");
        assert!(uploader.await.unwrap().is_err());

        server.abort();
    }
}
