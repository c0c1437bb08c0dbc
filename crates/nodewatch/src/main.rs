use anyhow::Context;
use clap::Parser;
use nodewatch::{
    args::Args,
    config::MonitorConfig,
    metrics::install_exporter,
    server::MetricsServer,
    shutdown::wait_for_shutdown,
    supervisor::Supervisor,
};
use tracing::{
    error,
    info,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = MonitorConfig::from_file(&args.conf)
        .with_context(|| format!("failed to load configuration from {}", args.conf))?;
    info!(
        conf = %args.conf,
        evm_nodes = config.evm.len(),
        cometbft_nodes = config.cometbft.len(),
        "Configuration loaded"
    );

    let handle = install_exporter().context("failed to install prometheus recorder")?;

    let supervisor = Supervisor::new(&config).context("failed to build node watchers")?;
    supervisor.start();

    let server = std::sync::Arc::new(MetricsServer::new(args.metrics_addr, handle));
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = ?e, "Metrics server exited");
            }
        })
    };

    wait_for_shutdown().await?;

    info!("Shutting down");
    supervisor.stop().await;
    server.stop();
    if let Err(e) = server_task.await {
        error!(error = ?e, "Metrics server task failed to join");
    }

    info!("Shutdown complete");
    Ok(())
}
