//! Metrics and health endpoints. The core only emits well-defined
//! points/events; scraping and shipping them is an external
//! collaborator's job.

pub mod health;
pub mod prometheus;
pub mod tracing_setup;

pub use prometheus::MetricsCollector;
pub use tracing_setup::TracingConfig;

use std::sync::Arc;
use warp::Filter;
use warp::Reply;

/// Shared metrics/health state served on the `--metrics-port` listener.
/// `metrics` points at the process-wide [`prometheus::global`] registry
/// every other component records into; `health` is local since uptime
/// only needs to be correct from the point `routes()` is built.
#[derive(Clone)]
pub struct MonitoringState {
    pub metrics: &'static MetricsCollector,
    pub health: Arc<health::HealthChecker>,
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self {
            metrics: prometheus::global(),
            health: Arc::new(health::HealthChecker::new()),
        }
    }
}

/// `GET /metrics` (Prometheus text exposition) and `GET /health`.
pub fn routes() -> impl Filter<Extract = (Box<dyn Reply>,), Error = std::convert::Infallible> + Clone
{
    let state = MonitoringState::default();

    let metrics_state = state.clone();
    let metrics = warp::path("metrics").and(warp::get()).map(move || {
        let body = warp::reply::with_header(
            metrics_state.metrics.render_prometheus(),
            "content-type",
            "text/plain; version=0.0.4",
        );
        Box::new(body) as Box<dyn Reply>
    });

    let health_state = state.clone();
    let health = warp::path("health").and(warp::get()).map(move || {
        let body = warp::reply::json(&health_state.health.snapshot());
        Box::new(body) as Box<dyn Reply>
    });

    metrics.or(health).unify()
}
