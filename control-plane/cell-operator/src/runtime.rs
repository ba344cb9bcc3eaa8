use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use kube::Client;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{config::CellOperatorConfig, controller::run_controller, web::run_http_server};

pub fn compute_http_addr(cfg: &CellOperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Cancels `token` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let term = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot install SIGTERM handler");
                    std::future::pending::<()>().await
                }
            }
        };
        #[cfg(not(unix))]
        let term = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("SIGINT received"),
            _ = term => info!("SIGTERM received"),
            _ = token.cancelled() => {}
        }
        token.cancel();
    })
}

pub fn spawn_controller(
    client: Client,
    cfg: CellOperatorConfig,
    shutdown: CancellationToken,
    ready: Arc<AtomicBool>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, cfg, shutdown, ready).await })
}

pub fn spawn_http(addr: SocketAddr, ready: Arc<AtomicBool>, shutdown: CancellationToken) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr, ready, shutdown).await })
}

/// Runs the controller and the health server until a signal arrives or
/// either of them fails.
pub async fn run_all(client: Client, cfg: CellOperatorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));
    let _signals = spawn_signal_handler(shutdown.clone());

    let http = spawn_http(compute_http_addr(&cfg), ready.clone(), shutdown.clone());
    let controller = spawn_controller(client, cfg, shutdown.clone(), ready);

    // the controller ending for any reason also stops the http server
    let controller = async {
        let res = controller.await;
        shutdown.cancel();
        res
    };
    let (c_res, h_res) = try_join!(controller, http)?;
    c_res?;
    h_res?;
    Ok(())
}
