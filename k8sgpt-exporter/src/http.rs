//! HTTP endpoints: metrics exposition plus liveness and readiness probes.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn create_router(collector: SharedCollector, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(collector)
}

async fn metrics(State(collector): State<SharedCollector>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        collector.render(),
    )
}

async fn health() -> &'static str {
    "ok\n"
}

/// Ready once a poll cycle has completed.
async fn ready(State(collector): State<SharedCollector>) -> impl IntoResponse {
    match collector.stats().last_success_timestamp {
        Some(timestamp) => (
            StatusCode::OK,
            format!("ready, last successful poll at {}\n", timestamp),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "waiting for the first successful poll\n".to_string(),
        ),
    }
}

/// Serves the collector's exposition output plus health probes.
pub struct HttpServer {
    collector: SharedCollector,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(collector: SharedCollector, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.listen_addr))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is set.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let router = create_router(self.collector, &self.metrics_path);

        info!(%addr, path = %self.metrics_path, "HTTP server listening");

        let stopped = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("HTTP server shutting down");
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(stopped)
            .await
            .context("HTTP server error")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::collector::MetricCollector;
    use crate::config::{LabelConfig, PrometheusConfig};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_collector() -> SharedCollector {
        Arc::new(MetricCollector::new(
            PrometheusConfig::default(),
            LabelConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = make_collector();
        let mut aggregate = Aggregate::default();
        aggregate.issues_total.insert("ops".to_string(), 4);
        collector.reconcile(&aggregate);
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("k8sgpt_issues_total{namespace=\"ops\"} 4"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let collector = make_collector();
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let collector = make_collector();
        collector.record_failure();
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let collector = make_collector();
        collector.record_success(0);

        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let collector = make_collector();
        let router = create_router(collector, "/k8sgpt/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/k8sgpt/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
