//! `GraphQLWsServer`: Axum HTTP endpoint that upgrades `graphql-ws` clients.
//!
//! Requests to the endpoint that do not offer the `graphql-ws` sub-protocol
//! are handed to a fallback router, so plain GraphQL-over-HTTP can share the
//! same path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use gqlws_core::GraphQLService;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::connection::transport::split_socket;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;

/// Sub-protocol negotiated on upgrade.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Authentication failure; answered with `401`.
#[derive(Debug, thiserror::Error)]
#[error("unauthorized: {0}")]
pub struct AuthError(pub String);

/// Decides whether an upgrade request may open a connection.
///
/// The returned attributes are attached to the connection and visible to
/// every service call through the operation context.
#[async_trait]
pub trait AuthValidator: Send + Sync + 'static {
    /// Validate the upgrade request headers.
    async fn validate(&self, headers: &HeaderMap) -> Result<Map<String, Value>, AuthError>;
}

/// Accepts every request with no attributes.
pub struct AllowAll;

#[async_trait]
impl AuthValidator for AllowAll {
    async fn validate(&self, _headers: &HeaderMap) -> Result<Map<String, Value>, AuthError> {
        Ok(Map::new())
    }
}

/// Server startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Other I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for server startup.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// Shared state accessible from Axum handlers.
struct AppState<S: GraphQLService> {
    service: Arc<S>,
    auth: Arc<dyn AuthValidator>,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownCoordinator>,
    slots: Arc<Semaphore>,
    fallback: Router,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl<S: GraphQLService> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            auth: self.auth.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            slots: self.slots.clone(),
            fallback: self.fallback.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        }
    }
}

/// The `graphql-ws` server.
pub struct GraphQLWsServer<S: GraphQLService> {
    config: Arc<ServerConfig>,
    service: Arc<S>,
    auth: Arc<dyn AuthValidator>,
    fallback: Router,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    slots: Arc<Semaphore>,
    start_time: Instant,
}

impl<S: GraphQLService> GraphQLWsServer<S> {
    /// Create a new server that accepts every client.
    pub fn new(config: ServerConfig, service: Arc<S>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config: Arc::new(config),
            service,
            auth: Arc::new(AllowAll),
            fallback: Router::new(),
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            slots,
            start_time: Instant::now(),
        }
    }

    /// Validate upgrade requests with `auth`.
    #[must_use]
    pub fn with_auth(mut self, auth: impl AuthValidator) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    /// Route for requests that do not offer `graphql-ws`.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Router) -> Self {
        self.fallback = fallback;
        self
    }

    /// Render metrics from `handle` at `/metrics` when enabled in config.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
            auth: self.auth.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            slots: self.slots.clone(),
            fallback: self.fallback.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler::<S>))
            .route(&self.config.path, any(graphql_handler::<S>));
        if self.config.metrics_enabled && self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler::<S>));
        }
        router.with_state(state).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(%local_addr, path = %self.config.path, "graphql-ws server listening");
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open connections.
    pub fn active_connections(&self) -> usize {
        self.shutdown.active()
    }
}

/// Whether the request lists `graphql-ws` in `Sec-WebSocket-Protocol`.
fn offers_graphql_ws(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == GRAPHQL_WS_PROTOCOL)
}

/// ANY {path}
async fn graphql_handler<S: GraphQLService>(
    State(state): State<AppState<S>>,
    request: Request,
) -> Response {
    if !offers_graphql_ws(request.headers()) {
        return match state.fallback.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
    }

    let (mut parts, _body) = request.into_parts();
    let attributes = match state.auth.validate(&parts.headers).await {
        Ok(attributes) => attributes,
        Err(e) => {
            warn!(error = %e, "upgrade rejected");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
        metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(%rejection, "not a websocket upgrade");
            return rejection.into_response();
        }
    };

    let config = state.config.connection.clone();
    let read_limit = config.read_limit;
    upgrade
        .protocols([GRAPHQL_WS_PROTOCOL])
        .max_message_size(read_limit)
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            let (reader, writer) = split_socket(socket);
            let connection = Connection::new(state.service, &state.shutdown.token(), config)
                .with_attributes(attributes);
            let _ = state
                .shutdown
                .track(connection.serve(reader, writer))
                .await;
        })
}

/// GET /health
async fn health_handler<S: GraphQLService>(
    State(state): State<AppState<S>>,
) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.active(),
    ))
}

/// GET /metrics
async fn metrics_handler<S: GraphQLService>(State(state): State<AppState<S>>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
