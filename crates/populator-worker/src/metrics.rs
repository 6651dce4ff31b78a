//! Progress endpoint
//!
//! Exposes `volume_populators_<tag>{<key>="<source id>"} <percent>` on
//! `/metrics`. The populator controller scrapes it while the pod runs.

use crate::error::WorkerError;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use crds::PopulatorKind;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Progress gauge for one populator kind
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    progress: IntGaugeVec,
}

impl std::fmt::Debug for WorkerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerMetrics").finish_non_exhaustive()
    }
}

impl WorkerMetrics {
    pub fn new(kind: PopulatorKind) -> Result<Self, WorkerError> {
        let registry = Registry::new();
        let progress = IntGaugeVec::new(
            Opts::new(kind.metric_tag(), "Percent of the source disk copied").namespace("volume_populators"),
            &[kind.metric_key()],
        )?;
        registry.register(Box::new(progress.clone()))?;
        Ok(Self { registry, progress })
    }

    /// Gauge for one source disk
    pub fn progress(&self, source_id: &str) -> IntGauge {
        self.progress.with_label_values(&[source_id])
    }

    /// Prometheus text exposition
    pub fn render(&self) -> Result<String, WorkerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| WorkerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

async fn metrics_handler(State(metrics): State<Arc<WorkerMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve `/metrics` until the process exits.
pub async fn serve(metrics: Arc<WorkerMetrics>, port: u16) -> Result<(), WorkerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving progress on {}/metrics", addr);
    axum::serve(listener, metrics.router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_exposition_format() {
        let metrics = WorkerMetrics::new(PopulatorKind::Ovirt).unwrap();
        metrics.progress("disk-1").set(42);
        let text = metrics.render().unwrap();
        assert!(text.contains("volume_populators_ovirt_volume_populator{disk_id=\"disk-1\"} 42"));
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Arc::new(WorkerMetrics::new(PopulatorKind::Openstack).unwrap());
        metrics.progress("img-1").set(100);
        let response = metrics
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("volume_populators_openstack_volume_populator{image_id=\"img-1\"} 100"));
    }
}
