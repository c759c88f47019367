//! veil-daemon: the Veil client-core daemon.
//!
//! Single OS process running a Tokio async runtime. Wires the discovery,
//! onion transport, storage RPC, and job scheduler layers together, then
//! waits for shutdown. Message-protocol executors are registered by the
//! application layer embedding this core.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use veil_db::queries;
use veil_jobs::JobRunner;
use veil_onion::path::HttpsGuardProbe;
use veil_onion::{OnionTransport, PathManager};
use veil_rpc::SnodeClient;
use veil_snode::SnodeDirectory;
use veil_types::NetworkClock;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config, then logging at the configured level.
    let config = DaemonConfig::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("veil={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!(network = %config.network.network, "Veil daemon starting");

    // 2. Open the database.
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db = veil_db::into_shared(veil_db::open(&data_dir.join("veil.db"))?);

    // 3. The network clock starts at zero offset every launch.
    let clock = Arc::new(NetworkClock::new());
    {
        let conn = db.lock().await;
        queries::settings::set_i64(&conn, "clock_offset_ms", 0)?;
    }

    // 4. HTTPS client. Service nodes present self-signed certificates keyed
    //    to their identity, so certificate-authority validation is off for
    //    this client; responses are authenticated by the onion layer keys.
    let http = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(config.network.request_timeout_secs * 2))
        .build()?;

    // 5. Discovery, paths, transport, RPC client.
    let directory = Arc::new(
        SnodeDirectory::load(db.clone(), config.network.network, http.clone()).await?,
    );
    let paths = PathManager::load(
        db.clone(),
        directory.clone(),
        Arc::new(HttpsGuardProbe::new(http.clone())),
    )
    .await?;
    let onion = Arc::new(
        OnionTransport::new(http.clone(), paths.clone(), clock.clone(), db.clone())
            .with_timeout(Duration::from_secs(config.network.request_timeout_secs)),
    );
    let snode_client = Arc::new(SnodeClient::new(onion.clone()));

    // 6. The job runner; executors are registered by the embedding
    //    application before the lifecycle events fire.
    let runner = Arc::new(JobRunner::new(db.clone()));
    runner.app_did_finish_launching().await?;
    runner.app_did_become_active().await?;

    // 7. Warm the pool in the background so the first real request has
    //    paths to build from.
    {
        let directory = directory.clone();
        let snode_client = snode_client.clone();
        tokio::spawn(async move {
            if let Err(e) = directory.get_pool(snode_client.as_ref()).await {
                tracing::warn!(error = %e, "Initial pool refresh failed");
            }
        });
    }

    info!("Veil daemon running");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    runner.stop_and_clear_pending(None).await;
    info!("Daemon stopped");
    Ok(())
}
