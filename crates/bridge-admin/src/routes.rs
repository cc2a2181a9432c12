//! The admin router: `/healthz`, `/status`, `/metrics`. Read-only — it reads
//! orchestrator/stats state and never participates in the pipeline's
//! critical path.

use crate::metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bridge_orchestrator::{GuildSummary, Orchestrator};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics_handle: PrometheusHandle,
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    healthy: bool,
    queue_depth: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    health_score: f64,
    stats: bridge_common::SystemStats,
    guilds: Vec<GuildSummary>,
}

async fn healthz(State(state): State<AdminState>) -> Response {
    let healthy = state.orchestrator.is_healthy();
    let body = HealthzResponse {
        healthy,
        queue_depth: state.orchestrator.ingress_queue_depth(),
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn status(State(state): State<AdminState>) -> Json<StatusResponse> {
    let stats = state.orchestrator.stats();
    Json(StatusResponse {
        status: stats.status_banner(),
        health_score: stats.health_score(),
        guilds: state.orchestrator.guild_summaries(),
        stats,
    })
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    metrics::record_snapshot(&state.orchestrator.stats());
    state.metrics_handle.render()
}

/// Builds the admin router. Mounted by the binary's composition root
/// alongside the pipeline's background tasks on `admin_http_port`.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
