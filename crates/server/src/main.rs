mod api;
mod background;
mod cli;
mod router;
mod startup;
mod state;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    askdesk_core::config::load_dotenv();
    let mut config = askdesk_core::Config::from_env();
    cli.apply(&mut config);
    config.validate()?;
    config.log_summary();

    let state = startup::build_app_state(&config)?;

    if cli.check {
        info!(
            index_chunks = state.index_chunks,
            providers = ?state.gateway.provider_ids(),
            "configuration ok"
        );
        state.queue.shutdown().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = startup::spawn_background_tasks(&config, &state, shutdown_rx);
    let app = router::build_router(state.clone(), &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining admission queue");
    let _ = shutdown_tx.send(true);
    state.queue.shutdown().await;
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "background task ended abnormally");
        }
    }
    info!("askdesk-server exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
