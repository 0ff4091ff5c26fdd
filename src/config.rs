use std::path::PathBuf;

use tokio::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_DOWNLOAD_DIR: &str = "/tmp/youtube-downloads";
pub const DEFAULT_YT_DLP_PATH: &str = "yt-dlp";
pub const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 250 * 1024 * 1024;
pub const DEFAULT_STALE_FILE_SECONDS: u64 = 2 * 60 * 60;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub download_dir: PathBuf,
    pub yt_dlp_path: PathBuf,
    pub yt_dlp_timeout: Duration,
    pub max_concurrent_downloads: usize,
    pub max_download_bytes: u64,
    /// Leftover job directories older than this are swept. Zero disables the sweep.
    pub stale_file_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            yt_dlp_path: PathBuf::from(DEFAULT_YT_DLP_PATH),
            yt_dlp_timeout: Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            stale_file_age: Duration::from_secs(DEFAULT_STALE_FILE_SECONDS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source; unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let download_dir = lookup("DOWNLOAD_DIR")
            .as_deref()
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);
        let yt_dlp_path = lookup("YT_DLP_PATH")
            .as_deref()
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.yt_dlp_path);
        let yt_dlp_timeout = parse_u64(lookup("YT_DLP_TIMEOUT_SECONDS"))
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.yt_dlp_timeout);
        let max_concurrent_downloads = lookup("MAX_CONCURRENT_DOWNLOADS")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_concurrent_downloads);
        let max_download_bytes = parse_u64(lookup("MAX_DOWNLOAD_BYTES"))
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_download_bytes);
        let stale_file_age = parse_u64(lookup("STALE_FILE_SECONDS"))
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_file_age);

        Self {
            bind_addr: resolve_bind_addr(&lookup),
            download_dir,
            yt_dlp_path,
            yt_dlp_timeout,
            max_concurrent_downloads,
            max_download_bytes,
            stale_file_age,
        }
    }
}

fn resolve_bind_addr(lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(configured) = lookup("APP_ADDR")
        .as_deref()
        .and_then(non_empty)
        .map(ToString::to_string)
    {
        return configured;
    }

    if let Some(port) = lookup("PORT").and_then(|value| value.trim().parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn parse_u64(value: Option<String>) -> Option<u64> {
    value.and_then(|value| value.trim().parse::<u64>().ok())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
