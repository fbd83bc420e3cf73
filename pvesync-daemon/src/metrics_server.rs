//! Prometheus exporter.
//!
//! Serves `GET /metrics` in text exposition format. Any other path is 404.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use pvesync_engine::{Shutdown, SyncMetrics};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(metrics: Arc<SyncMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .fallback(not_found)
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<SyncMetrics>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], metrics.render_prometheus())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Bind `0.0.0.0:{port}`.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {}", addr))
}

/// Serve until `shutdown` fires.
pub async fn serve(listener: TcpListener, metrics: Arc<SyncMetrics>, shutdown: Shutdown) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Metrics endpoint listening");
    }
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("Metrics server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvesync_engine::{shutdown_channel, ShutdownTrigger};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    async fn start(metrics: Arc<SyncMetrics>) -> (SocketAddr, ShutdownTrigger, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn(serve(listener, metrics, shutdown));
        (addr, trigger, handle)
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_prometheus_text() {
        let metrics = Arc::new(SyncMetrics::new());
        metrics.record_full_sync();
        metrics.record_synced(2, 1);
        let (addr, trigger, handle) = start(metrics).await;

        let response = get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.to_lowercase().contains("content-type: text/plain"));
        assert!(response.contains("pvesync_full_syncs_total 1\n"));
        assert!(response.contains("pvesync_vms_synced_total 2\n"));

        trigger.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let (addr, trigger, handle) = start(Arc::new(SyncMetrics::new())).await;

        let response = get(addr, "/health").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        trigger.trigger();
        handle.await.unwrap().unwrap();
    }
}
