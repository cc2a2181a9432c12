//! Read-only administrative HTTP surface for the bridge: `/healthz` (200/503
//! from the orchestrator's health predicate), `/status` (JSON stats plus a
//! per-guild summary), and `/metrics` (Prometheus text exposition). This
//! surface never touches the pipeline's critical path — it only reads
//! state the orchestrator already maintains.

pub mod metrics;
pub mod routes;

pub use metrics::init_metrics_recorder;
pub use routes::{admin_router, AdminState};
