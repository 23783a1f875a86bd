//! Local HTTP server used as a load target in tests.
//!
//! Routes:
//! - `GET /bytes/:n` — `n` bytes with a `Content-Length` header
//! - `GET /chunked/:n` — `n` bytes streamed without `Content-Length`
//! - `GET /redirect/:n` — redirects to `/redirect/{n-1}`; `/redirect/0` is 200
//! - `GET /stall/:ms` — waits `ms` milliseconds, then 200
//! - `GET /slow/:ms` — same as stall; meant for concurrency measurements
//! - `GET /status/:code` — responds with `code`
//!
//! Every request is counted, and the peak number of requests being served at
//! once is tracked.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;

const CHUNK_SIZE: usize = 1024;

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
}

/// Counters shared between the server and the test.
#[derive(Debug, Default)]
pub struct ServerStats {
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ServerStats {
    /// Total requests received, redirect hops included.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were being served at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Values of header `name` (case-insensitive) across all requests.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .flat_map(|r| r.headers)
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .collect()
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }
}

/// Decrements the in-flight count when the request ends, including when the
/// client disconnects and the handler future is dropped.
struct InFlightGuard(Arc<ServerStats>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running target server bound to an ephemeral localhost port.
pub struct TargetServer {
    addr: SocketAddr,
    stats: Arc<ServerStats>,
}

impl TargetServer {
    /// Bind to `127.0.0.1:0` and serve in a background task.
    ///
    /// The server lives until the test runtime shuts down.
    pub async fn start() -> Self {
        let stats = Arc::new(ServerStats::default());

        let app = Router::new()
            .route("/bytes/:n", get(sized_body))
            .route("/chunked/:n", get(chunked_body))
            .route("/redirect/:n", get(redirect_chain))
            .route("/stall/:ms", get(delayed))
            .route("/slow/:ms", get(delayed))
            .route("/status/:code", get(fixed_status))
            .layer(middleware::from_fn_with_state(stats.clone(), track));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind target server");
        let addr = listener.local_addr().expect("target server address");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, stats }
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

async fn track(State(stats): State<Arc<ServerStats>>, request: Request, next: Next) -> Response {
    let _guard = stats.enter();
    let recorded = RecordedRequest {
        path: request.uri().path().to_string(),
        headers: request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    };
    if let Ok(mut requests) = stats.requests.lock() {
        requests.push(recorded);
    }
    next.run(request).await
}

async fn sized_body(Path(n): Path<usize>) -> Vec<u8> {
    vec![b'x'; n]
}

async fn chunked_body(Path(n): Path<usize>) -> Response {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = (0..n)
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(vec![b'x'; CHUNK_SIZE.min(n - start)]))
        .collect();
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}

async fn redirect_chain(Path(n): Path<u32>) -> Response {
    if n == 0 {
        "arrived".into_response()
    } else {
        Redirect::to(&format!("/redirect/{}", n - 1)).into_response()
    }
}

async fn delayed(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn fixed_status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {code}")).into_response()
}
