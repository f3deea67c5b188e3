//! Recrawl server - main entry point.
//!
//! Starts the HTTP API together with:
//! - WorkerPool: drains the dispatch queue through the configured processor
//! - Sweeper: SLA expiry, cache purge, idle bucket eviction

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use recrawl_core::api::{self, AppState};
use recrawl_core::dispatch::{build_processor, Sweeper, WorkerPool};
use recrawl_core::Config;

#[derive(Debug, Parser)]
#[command(name = "recrawl-server", version, about = "Recrawl job admission and dispatch server")]
struct Args {
    /// JSON config file. RECRAWL_* environment variables override it.
    #[arg(short, long, env = "RECRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.listen_addr`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;
    let config = Arc::new(config);

    // Initialize observability
    recrawl_core::observability::init_tracing(&config.observability);

    let state = AppState::from_config(config.clone())?;

    let pool = Arc::new(WorkerPool::new(
        state.recrawl.queue().clone(),
        state.recrawl.store().clone(),
        build_processor(&config.workers)?,
        config.workers.concurrency,
    ));
    let pool_handle = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run().await }
    });

    let mut sweeper = Sweeper::new(
        state.recrawl.store().clone(),
        state.limiter.clone(),
        config.sweeper.clone(),
    )
    .with_cache(state.search.cache().clone());
    let sweeper_handle = sweeper.start();

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        api = %config.server.api_name,
        workers = config.workers.concurrency,
        "recrawl_server_started"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("recrawl_server_stopping");
    pool.shutdown();
    let report = pool_handle.await?;
    tracing::info!(
        completed = report.completed,
        drained = report.drained.len(),
        "worker_pool_drained"
    );
    sweeper.stop();
    sweeper_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl_c_handler_failed");
        std::future::pending::<()>().await;
    }
}
