use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use postshot::cdp::CdpFactory;
use postshot::config::Cli;
use postshot::pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .init();

    let config = cli.into_config().context("invalid configuration")?;
    let listen = config.listen;

    let pipeline = Pipeline::new(config, Arc::new(CdpFactory)).context("failed to build pipeline")?;
    let app = postshot::server::router(Arc::new(pipeline));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!("postshot listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("postshot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
