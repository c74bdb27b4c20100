//! Admin listener
//!
//! Optional, bound only when `admin.listen_addr` is set. Read-only:
//! - GET /health: pool health report (200 healthy, 503 degraded)
//! - GET /metrics: Prometheus text exposition

use account_pool::HealthReporter;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::warn;

/// Shared state for admin handlers
#[derive(Clone)]
pub struct AdminState {
    reporter: HealthReporter,
    prometheus: PrometheusHandle,
}

impl AdminState {
    pub fn new(reporter: HealthReporter, prometheus: PrometheusHandle) -> Self {
        Self {
            reporter,
            prometheus,
        }
    }
}

/// Build the admin router. `max_connections` caps concurrent requests.
pub fn build_admin_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// GET /health: counts per status plus shortfall/over-capacity flags.
async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let (status_code, body) = match state.reporter.report().await {
        Ok(report) => {
            let code = if report.shortfall {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            let mut body = serde_json::to_value(&report).unwrap_or_default();
            body["status"] = report.status().into();
            (code, body)
        }
        Err(e) => {
            warn!(error = %e, "health report failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            )
        }
    };

    (
        status_code,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}
