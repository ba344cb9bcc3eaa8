use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

async fn readyz(State(ready): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

pub fn router(ready: Arc<AtomicBool>) -> Router {
    // /health is preferred; /healthz kept for probes that expect it
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(ready)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(addr: SocketAddr, ready: Arc<AtomicBool>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health server listening on {}", addr);
    axum::serve(listener, router(ready))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(addr: SocketAddr, path: &str) -> reqwest::StatusCode {
        reqwest::get(format!("http://{addr}{path}")).await.unwrap().status()
    }

    #[tokio::test]
    async fn readiness_follows_flag() {
        let ready = Arc::new(AtomicBool::new(false));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let app = router(ready.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        assert_eq!(get(addr, "/health").await, reqwest::StatusCode::OK);
        assert_eq!(get(addr, "/healthz").await, reqwest::StatusCode::OK);
        assert_eq!(get(addr, "/readyz").await, reqwest::StatusCode::SERVICE_UNAVAILABLE);
        ready.store(true, Ordering::SeqCst);
        assert_eq!(get(addr, "/readyz").await, reqwest::StatusCode::OK);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
