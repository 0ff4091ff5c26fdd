use tokio::net::TcpListener;
use tracing::{error, info};
use yt_convert::{AppState, Config, build_router, error::ApiError};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "yt_convert=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        error!("server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();
    let state = AppState::new(&config);
    let workspace = state.converter.workspace();

    workspace.ensure_dir().await.map_err(|error| {
        ApiError::internal(format!(
            "could not create download directory {:?}: {error}",
            workspace.dir()
        ))
    })?;
    workspace
        .cleanup_stale_jobs(state.converter.stale_file_age())
        .await;

    info!(
        download_dir = ?config.download_dir,
        yt_dlp = ?config.yt_dlp_path,
        timeout_secs = config.yt_dlp_timeout.as_secs(),
        max_concurrent_downloads = config.max_concurrent_downloads,
        "configuration loaded"
    );

    let app = build_router(state);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("could not bind {}: {error}", config.bind_addr))
    })?;

    info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
