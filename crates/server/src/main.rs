use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use medialift_server::config::ServerConfig;
use medialift_server::http::{AppState, router};
use medialift_server::{Finalizer, FsObjectStorage, UploadPolicy, UploadStore, spawn_sweeper};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = ServerConfig::from_env_and_args()?;
    info!(?cfg, "starting medialift server");

    std::fs::create_dir_all(cfg.spool_dir())?;
    std::fs::create_dir_all(cfg.objects_dir())?;

    let policy = UploadPolicy {
        max_file_size: cfg.max_file_size,
        ..UploadPolicy::default()
    };
    let store = Arc::new(UploadStore::new(
        cfg.spool_dir(),
        cfg.chunk_size,
        policy,
        cfg.session_ttl,
    ));
    let finalizer = Arc::new(Finalizer::new(Arc::new(FsObjectStorage::new(
        cfg.objects_dir(),
    ))));

    let sweep_token = CancellationToken::new();
    let sweeper = spawn_sweeper(Arc::clone(&store), SWEEP_INTERVAL, sweep_token.clone());

    let app = router(AppState { store, finalizer });
    let listener = TcpListener::bind(cfg.addr()).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_token.cancel();
    let _ = sweeper.await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
