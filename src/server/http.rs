//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Every connection is
//! served with upgrades enabled so `/subscribe` can switch to WebSocket.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::context::TableflowContext;
use crate::routes;
use crate::types::TableflowError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub ctx: Arc<TableflowContext>,
    pub started_at: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(args: Args, ctx: Arc<TableflowContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            args,
            ctx,
            started_at: Instant::now(),
            shutdown_tx,
        }
    }

    /// Get a shutdown receiver for graceful termination
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting connections and close open subscription sockets
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Start the HTTP server; returns once `AppState::shutdown` is called
pub async fn run(state: Arc<AppState>) -> Result<(), TableflowError> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), TableflowError> {
    let local = listener.local_addr()?;
    info!(
        "tableflow listening on {} ({} tables)",
        local,
        state.ctx.registry.list_tables().len()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - readiness ignores empty schema");
    }

    let mut shutdown_rx = state.shutdown_receiver();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .preserve_header_case(true)
                            .title_case_headers(true)
                            .serve_connection(io, service)
                            .with_upgrades()
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = shutdown_rx.recv() => {
                info!("HTTP server shutting down");
                return Ok(());
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state).await)
        }
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(&state).await)
        }
        (Method::GET, "/status") => to_boxed(routes::status_check(&state).await),
        (Method::GET, "/metrics") => to_boxed(routes::metrics_export(&state)),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        (Method::GET, "/tables") => to_boxed(routes::list_tables(&state)),
        (Method::GET, p) if p.starts_with("/tables/") => {
            let name = p.strip_prefix("/tables/").unwrap_or("");
            to_boxed(routes::describe_table(&state, name))
        }
        (Method::POST, p) if p.starts_with("/tables/") && p.ends_with("/resume") => {
            let name = p
                .strip_prefix("/tables/")
                .and_then(|rest| rest.strip_suffix("/resume"))
                .unwrap_or("");
            to_boxed(routes::resume_table(&state, name))
        }

        (Method::POST, "/query/get") => match read_body(req).await {
            Ok(body) => to_boxed(routes::query_get(&state, &body)),
            Err(resp) => to_boxed(resp),
        },
        (Method::POST, "/query/scan") => match read_body(req).await {
            Ok(body) => to_boxed(routes::query_scan(&state, &body)),
            Err(resp) => to_boxed(resp),
        },

        (Method::GET, "/subscribe") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                to_boxed(routes::handle_subscribe_upgrade(Arc::clone(&state), req))
            } else {
                to_boxed(routes::error_response(TableflowError::BadRequest(
                    "/subscribe requires a WebSocket upgrade".into(),
                )))
            }
        }

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Collect a request body, mapping failures to a 400 response
async fn read_body(req: Request<Incoming>) -> Result<Bytes, Response<Full<Bytes>>> {
    match req.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            warn!("Request body error: {}", e);
            Err(routes::error_response(TableflowError::BadRequest(
                "Failed to read request body".into(),
            )))
        }
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "Try /tables, /query/scan or a WebSocket connection to /subscribe"
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
