mod cache;
mod discovery;
mod error;
mod fetcher;
mod handlers;
mod mirror;
mod models;
mod registry;
mod routing;
mod settings;
mod state;
mod stats;
mod sync;

use std::sync::Arc;

use anyhow::Context as _;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::cache::SystemClock;
use crate::fetcher::HttpTransport;
use crate::state::{AppState, Config};
use crate::sync::SyncTrigger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env();
    let transport = HttpTransport::new(config.peeringdb_api_key.as_deref(), config.request_timeout())
        .context("failed to build HTTP client")?;
    let state = Arc::new(
        AppState::new(config.clone(), transport, Arc::new(SystemClock))
            .await
            .context("failed to initialise state")?,
    );

    // Serve the existing mirror right away; a stale one is refreshed in the background.
    let startup = state.clone();
    tokio::spawn(async move {
        startup.syncer.run_logged(SyncTrigger::Startup, true).await;
    });

    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler error: {e:?}"))?;
    let scheduled = state.clone();
    let job = Job::new_async(config.refresh_cron.as_str(), move |_uuid, _lock| {
        let state = scheduled.clone();
        Box::pin(async move {
            state.syncer.run_logged(SyncTrigger::Schedule, false).await;
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid REFRESH_CRON {:?}: {e:?}", config.refresh_cron))?;
    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("scheduler error: {e:?}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler error: {e:?}"))?;
    info!("Scheduled mirror sync with cron '{}'", config.refresh_cron);

    let app = handlers::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
