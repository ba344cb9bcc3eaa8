use cell_operator::{config::CellOperatorConfig, init_tracing, runtime};
use envconfig::Envconfig;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube and reqwest both need a process-wide rustls provider.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider()) {
        tracing::debug!(?e, "CryptoProvider already installed; proceeding");
    }

    let cfg = CellOperatorConfig::init_from_env()?;
    info!(?cfg, "starting cell operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
