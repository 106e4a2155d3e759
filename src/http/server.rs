//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every gateway route
//! - Wire per-route guards (auth, then rate limit) and global layers
//!   (request id, tracing, metrics, CORS)
//! - Own the limiter registry and run its reaper for the server's lifetime
//! - Serve with graceful shutdown
//!
//! # Layer order (outermost first)
//! ```text
//! SetRequestId → Trace → PropagateRequestId → metrics → preflight 204 → CORS
//!     → [protected routes] auth → rate limit → handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::{Method, Uri},
    middleware,
    routing::{get, post, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::forwarder::{WorkerClient, WorkerRequest};
use crate::health;
use crate::http::handlers;
use crate::http::request::{
    propagate_request_id_layer, set_request_id_layer, RequestContext, X_REQUEST_ID,
};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{RouteClass, RouteClassification};
use crate::security::{
    auth::{auth_middleware, AuthConfig, AuthGuard},
    cors::{cors_layer, preflight_no_content},
    rate_limit::{rate_limit_middleware, BucketReaper, RateLimiterRegistry, RouteLimit},
};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid worker URL: {0}")]
    WorkerUrl(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct GatewayState {
    pub worker: WorkerClient,
    pub routes: Arc<RouteClassification>,
    pub trigger_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl GatewayState {
    /// Outbound request for `route` with its timeout and the caller's id.
    pub fn worker_request(
        &self,
        route: RouteClass,
        method: Method,
        ctx: &RequestContext,
    ) -> WorkerRequest {
        WorkerRequest::new(route, method, self.routes.timeout(route), &ctx.request_id)
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    limiter: Arc<RateLimiterRegistry>,
}

impl GatewayServer {
    /// Create the server with a fresh limiter registry.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        Self::with_limiter(config, Arc::new(RateLimiterRegistry::new()))
    }

    /// Create the server around an existing limiter registry.
    pub fn with_limiter(
        config: GatewayConfig,
        limiter: Arc<RateLimiterRegistry>,
    ) -> Result<Self, ServerError> {
        let worker = WorkerClient::new(&config.worker)?;
        let routes = Arc::new(RouteClassification::from_config(
            &config.rate_limit,
            &config.timeouts,
        ));
        let guard = Arc::new(AuthGuard::new(AuthConfig::resolve(&config.auth)));
        let cors = cors_layer(&config.cors.allowed_origins);

        tracing::info!(
            worker = %worker.base(),
            auth_mode = %guard.config().mode(),
            upload_per_minute = config.rate_limit.upload_per_minute,
            ask_per_minute = config.rate_limit.ask_per_minute,
            search_per_minute = config.rate_limit.search_per_minute,
            cors_origins = config.cors.allowed_origins.len(),
            "Gateway configured"
        );

        let state = GatewayState {
            worker,
            routes: routes.clone(),
            trigger_timeout: Duration::from_secs(config.timeouts.trigger_secs),
            max_upload_bytes: config.listener.max_upload_bytes,
        };

        let router = build_router(state, guard, limiter.clone(), cors);
        Ok(Self {
            router,
            config,
            limiter,
        })
    }

    /// The assembled router, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiterRegistry> {
        self.limiter.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reaper = BucketReaper::new(
            self.limiter.clone(),
            Duration::from_secs(self.config.rate_limit.reaper_interval_secs),
            self.config.rate_limit.idle_multiple,
        );
        let reaper_task = tokio::spawn(reaper.run(shutdown.subscribe()));

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.notified())
            .await;

        // Stop the reaper even when serving ended without a signal.
        shutdown.trigger();
        if let Err(e) = reaper_task.await {
            tracing::error!(error = %e, "Bucket reaper task failed");
        }

        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Auth first, then the route's limiter. A denied request never reaches the handler.
fn protected(
    handler: MethodRouter<GatewayState>,
    route: RouteClass,
    guard: &Arc<AuthGuard>,
    limiter: &Arc<RateLimiterRegistry>,
    routes: &RouteClassification,
) -> MethodRouter<GatewayState> {
    let limit = RouteLimit {
        registry: limiter.clone(),
        route,
        capacity: routes.capacity(route),
    };
    handler
        .layer(middleware::from_fn_with_state(limit, rate_limit_middleware))
        .layer(middleware::from_fn_with_state(guard.clone(), auth_middleware))
}

/// Authenticated but never rate limited.
fn authenticated(
    handler: MethodRouter<GatewayState>,
    guard: &Arc<AuthGuard>,
) -> MethodRouter<GatewayState> {
    handler.layer(middleware::from_fn_with_state(guard.clone(), auth_middleware))
}

/// Build the Axum router with all middleware layers.
pub fn build_router(
    state: GatewayState,
    guard: Arc<AuthGuard>,
    limiter: Arc<RateLimiterRegistry>,
    cors: CorsLayer,
) -> Router {
    let routes = state.routes.clone();
    let upload_limit = state.max_upload_bytes;

    let upload = protected(
        post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        RouteClass::Upload,
        &guard,
        &limiter,
        &routes,
    );
    let ask = protected(post(handlers::ask), RouteClass::Ask, &guard, &limiter, &routes);
    let search = protected(
        get(handlers::search),
        RouteClass::Search,
        &guard,
        &limiter,
        &routes,
    );

    Router::new()
        .route("/health", get(health::health))
        .route("/health/full", get(health::health_full))
        .route("/status", get(handlers::status))
        .route("/upload", upload)
        .route("/ask", ask)
        .route("/search", search)
        .route("/export", authenticated(get(handlers::export), &guard))
        .route(
            "/export/archive",
            authenticated(get(handlers::export_archive), &guard),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(propagate_request_id_layer())
                .layer(middleware::from_fn(metrics::track_requests))
                .layer(middleware::from_fn(preflight_no_content))
                .layer(cors),
        )
}

async fn not_found(ctx: RequestContext, uri: Uri) -> axum::response::Response {
    GatewayError::NotFound(uri.path().to_string()).into_response_for(&ctx.request_id)
}
