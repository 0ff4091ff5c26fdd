use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{config::Config, convert::Converter, workspace::Workspace, ytdlp::YtDlp};

#[derive(Clone)]
pub struct AppState {
    pub converter: Converter,
    /// Bounds how many downloader processes run at once; extra requests wait.
    pub download_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let converter = Converter::new(
            YtDlp::new(&config.yt_dlp_path, config.yt_dlp_timeout),
            Workspace::new(&config.download_dir),
            config.max_download_bytes,
            config.stale_file_age,
        );

        Self {
            converter,
            download_semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
        }
    }
}
