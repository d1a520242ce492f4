use std::sync::Arc;

use anyhow::{Context, Result};
use kube::Client;
use tokio::net::TcpListener;
use tracing::info;

use azure_collector::azure::ClientSetFactory;
use azure_collector::collector::Collector;
use azure_collector::config::load_config;
use azure_collector::kubernetes::KubeSecretStore;
use azure_collector::server;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config().context("loading configuration")?;
    info!(
        location = %cfg.location,
        gs_tenant = %cfg.gs_tenant_id,
        operator_credential = cfg.operator_credential.is_some(),
        "starting azure-collector"
    );

    let client = Client::try_default().await.context("creating kubernetes client")?;
    let store = Arc::new(KubeSecretStore::new(client));

    let http = reqwest::Client::builder()
        .timeout(cfg.scrape_timeout)
        .build()
        .context("creating http client")?;
    let factory = ClientSetFactory::from_config(&cfg, http);
    let collector = Collector::new(&cfg, store, factory).context("registering metrics")?;

    let listener = TcpListener::bind(cfg.listen_address)
        .await
        .with_context(|| format!("binding {}", cfg.listen_address))?;
    server::serve(listener, Arc::new(collector))
        .await
        .context("serving metrics")?;

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
