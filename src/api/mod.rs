//! HTTP adapter
//!
//! Maps routing answers to status codes and pretty-printed JSON bodies:
//!
//! | Route | Answers |
//! |-------|---------|
//! | `GET /v1/primary` | 200 name, 404 none, 409 several |
//! | `GET /v1/primaries`, `GET /v1/standbys` | 200 sorted list |
//! | `GET /v1/:id/status` | 200 role, 404 invalid, 422 unavailable |
//! | `GET /v1/:id/availability` | 200 ok, 408 exceeded, 417 anything else |
//! | `GET /metrics`, `GET /health` | exposition text, `OK` |

pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Extension, MatchedPath, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::{AvailabilityStatus, NodeStatus, RoutingHandler};
use crate::metrics::metrics;
use crate::registry::ALL_GROUP;

/// Availability limit (seconds) when the request does not name one
pub const DEFAULT_LIMIT: f64 = 10.0;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state of the API routes
#[derive(Clone)]
pub struct ApiState {
    handler: Arc<RoutingHandler>,
    /// Parent of every request deadline
    shutdown: CancellationToken,
    request_timeout: Duration,
}

impl ApiState {
    pub fn new(
        handler: Arc<RoutingHandler>,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            shutdown,
            request_timeout,
        }
    }
}

/// Cancelled when the request deadline passes, on shutdown, or once the
/// response is ready
#[derive(Clone)]
struct Deadline(CancellationToken);

/// `?group=`; absent or empty means every node
#[derive(Debug, Default, Deserialize)]
pub struct GroupParams {
    group: Option<String>,
}

impl GroupParams {
    pub fn group(&self) -> &str {
        self.group
            .as_deref()
            .filter(|g| !g.is_empty())
            .unwrap_or(ALL_GROUP)
    }
}

/// `?limit=` in seconds
#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityParams {
    limit: Option<String>,
}

/// Availability limit from the `limit` parameter.
///
/// Absent means [`DEFAULT_LIMIT`]. Empty or negative means no limit.
pub fn parse_limit(limit: Option<&str>) -> Result<Option<f64>, String> {
    match limit.map(str::trim) {
        None => Ok(Some(DEFAULT_LIMIT)),
        Some("") => Ok(None),
        Some(value) => match value.parse::<f64>() {
            Ok(limit) if limit.is_finite() && limit < 0.0 => Ok(None),
            Ok(limit) if limit.is_finite() => Ok(Some(limit)),
            _ => Err(format!("invalid value for limit ({} is not a number)", value)),
        },
    }
}

fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(body) => (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode response body");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn get_primary(
    State(state): State<ApiState>,
    Extension(Deadline(cancel)): Extension<Deadline>,
    Query(params): Query<GroupParams>,
) -> Response {
    let primaries = state.handler.get_primaries(params.group(), &cancel).await;
    match primaries.as_slice() {
        [] => json(StatusCode::NOT_FOUND, ""),
        [primary] => json(StatusCode::OK, primary),
        _ => json(StatusCode::CONFLICT, ""),
    }
}

async fn get_primaries(
    State(state): State<ApiState>,
    Extension(Deadline(cancel)): Extension<Deadline>,
    Query(params): Query<GroupParams>,
) -> Response {
    let primaries = state.handler.get_primaries(params.group(), &cancel).await;
    json(StatusCode::OK, &primaries)
}

async fn get_standbys(
    State(state): State<ApiState>,
    Extension(Deadline(cancel)): Extension<Deadline>,
    Query(params): Query<GroupParams>,
) -> Response {
    let standbys = state.handler.get_standbys(params.group(), &cancel).await;
    json(StatusCode::OK, &standbys)
}

async fn get_node_status(
    State(state): State<ApiState>,
    Extension(Deadline(cancel)): Extension<Deadline>,
    Path(id): Path<String>,
) -> Response {
    let status = state.handler.get_node_status(&id, &cancel).await;
    let code = match status {
        NodeStatus::Primary | NodeStatus::Standby => StatusCode::OK,
        NodeStatus::Invalid => StatusCode::NOT_FOUND,
        NodeStatus::Unavailable => StatusCode::UNPROCESSABLE_ENTITY,
    };
    json(code, status.as_str())
}

async fn get_node_availability(
    State(state): State<ApiState>,
    Extension(Deadline(cancel)): Extension<Deadline>,
    Path(id): Path<String>,
    Query(params): Query<AvailabilityParams>,
) -> Response {
    let limit = match parse_limit(params.limit.as_deref()) {
        Ok(limit) => limit,
        Err(message) => {
            warn!(node = %id, "{}", message);
            return json(StatusCode::BAD_REQUEST, &message);
        }
    };

    let status = state.handler.get_node_availability(&id, limit, &cancel).await;
    let code = match status {
        AvailabilityStatus::Ok => StatusCode::OK,
        AvailabilityStatus::Exceeded { .. } => StatusCode::REQUEST_TIMEOUT,
        AvailabilityStatus::Unavailable(_) | AvailabilityStatus::Invalid => {
            StatusCode::EXPECTATION_FAILED
        }
    };
    json(code, &status.to_string())
}

async fn get_metrics() -> Response {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        metrics().gather(),
    )
        .into_response()
}

async fn get_health() -> &'static str {
    "OK"
}

/// Give the request a deadline token; queries of this request stop at the
/// deadline or on shutdown
async fn with_deadline(State(state): State<ApiState>, mut req: Request, next: Next) -> Response {
    let token = state.shutdown.child_token();
    let _guard = token.clone().drop_guard();

    let timer = token.clone();
    let timeout = state.request_timeout;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });

    req.extensions_mut().insert(Deadline(token));
    next.run(req).await
}

async fn track_request(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let elapsed = started.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    metrics().record_request(&route, status, elapsed);
    debug!(method = %method, path = %path, status = status, elapsed = elapsed, "Handled request");
    response
}

/// All API routes. Unknown paths get 404, other methods 405.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/primary", get(get_primary))
        .route("/v1/primaries", get(get_primaries))
        .route("/v1/standbys", get(get_standbys))
        .route("/v1/:id/status", get(get_node_status))
        .route("/v1/:id/availability", get(get_node_availability))
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .route_layer(middleware::from_fn_with_state(state.clone(), with_deadline))
        .route_layer(middleware::from_fn(track_request))
        .with_state(state)
}

/// Bind `addr` and serve until shutdown; HTTPS when `tls` is set
pub async fn serve(state: ApiState, addr: &str, tls: Option<TlsAcceptor>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    let scheme = if tls.is_some() { "https" } else { "http" };
    info!(addr = %local, scheme = scheme, "API server listening");
    serve_listener(listener, state, tls).await
}

/// Serve on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    state: ApiState,
    tls: Option<TlsAcceptor>,
) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("API server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let app = app.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, app, peer).await,
                    Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(stream, app, peer).await,
            }
        });
    }
}

async fn serve_connection<I>(io: I, app: Router, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(app);
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!(peer = %peer, error = %e, "Connection error");
    }
}
