use std::sync::Arc;

use commitsync::{
    config::Settings,
    http::{http_router, AppState},
    services::SyncService,
};
use commitsync_core::{set_transport_timeouts, GitRepo, RemoteGitRepo};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let settings = Settings::from_env()?;

    if !settings.verify_host_key {
        tracing::warn!("SSH host key verification is disabled");
    }

    // process-wide in libgit2, so set before the runtime spawns workers
    set_transport_timeouts(settings.network_timeout);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(settings))
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let git_repo: Arc<dyn GitRepo> = Arc::new(RemoteGitRepo::new(
        &settings.repo_url,
        &settings.branch,
        settings.remote_options(),
    ));

    let sync_service = Arc::new(SyncService::new(git_repo, settings.sync.clone()));

    // the service still starts; every request retries initialization
    if let Err(err) = sync_service.ensure_working_copy_ready().await {
        tracing::error!("working copy not ready at startup: {}", err);
    }

    let app = http_router(AppState {
        sync_service,
        targets: Arc::new(settings.targets.clone()),
    });

    let addr = settings.listen_addr()?;
    tracing::info!("api server listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }

    tracing::info!("shutting down");
}
