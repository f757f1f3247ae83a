//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, request ID set and propagate)
//! - Bound each exchange by the configured request timeout
//! - Hand every request to the `ExchangeExecutor`
//! - Observability (metrics, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::config::{FailureConfig, GatewayConfig};
use crate::engine::{Connector, ExchangeExecutor};
use crate::http::request::into_exchange;
use crate::http::response::outcome_response;
use crate::observability::metrics;
use crate::policy::{PolicyBinding, PolicyContext};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: ExchangeExecutor,
    pub failures: FailureConfig,
    pub request_timeout: Duration,
}

/// HTTP front end of the policy gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
}

impl GatewayServer {
    /// Create a gateway running `policies`, in order, in front of `connector`.
    pub fn new(
        config: GatewayConfig,
        policies: Vec<PolicyBinding>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        tracing::info!(
            policies = policies.len(),
            upstream = %config.upstream.url,
            "Building gateway"
        );

        let state = AppState {
            executor: ExchangeExecutor::new(policies, connector),
            failures: config.failures.clone(),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        let router = Self::build_router(state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// The fully layered router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight exchanges.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight exchanges");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Main gateway handler.
/// Runs the exchange through both chains and renders the outcome.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();

    // 1. Correlate: reuse the request ID as exchange ID when it is a UUID
    let context = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .map(PolicyContext::with_exchange_id)
        .unwrap_or_default();
    let context = Arc::new(context);

    tracing::debug!(
        exchange_id = %context.exchange_id(),
        method = %request.method(),
        path = %request.uri().path(),
        "Gateway request"
    );

    // 2. Execute
    let (api_request, body) = into_exchange(request);
    let exchange = state
        .executor
        .execute_with_context(api_request, body, context.clone());

    match tokio::time::timeout(state.request_timeout, exchange).await {
        // 3. Render
        Ok(outcome) => {
            let label = outcome.label();
            let response = outcome_response(outcome, &state.failures);
            metrics::record_exchange(label, response.status().as_u16(), start_time);
            response
        }
        Err(_) => {
            tracing::warn!(
                exchange_id = %context.exchange_id(),
                timeout_secs = state.request_timeout.as_secs(),
                "Exchange timed out"
            );
            metrics::record_exchange("timeout", 504, start_time);
            (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout").into_response()
        }
    }
}
