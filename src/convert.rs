//! The download adapter: turns a conversion request into one yt-dlp run and
//! hands back the produced media file.

use std::{io, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::{workspace::Workspace, ytdlp::YtDlp};

const SUPPORTED_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "youtu.be", "www.youtu.be"];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("Download failed: {0}")]
    ExternalToolFailure(String),

    #[error("Downloaded file not found")]
    OutputNotFound,

    #[error("Downloaded file is {size} bytes, above the {limit} byte limit")]
    OutputTooLarge { size: u64, limit: u64 },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

/// Body of `POST /api/convert`. Every field is optional on the wire so that
/// missing values get the documented error messages instead of a
/// deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct ConvertRequest {
    pub url: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Audio,
    Video,
}

impl OutputFormat {
    /// `"mp3"` selects audio extraction; anything else is a video download.
    pub fn from_request(value: Option<&str>) -> Self {
        match value {
            Some("mp3") => Self::Audio,
            _ => Self::Video,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Video => "video/mp4",
        }
    }

    fn preferred_extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value? {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// yt-dlp `--audio-quality` value (VBR scale, 0 is best).
    pub fn audio_quality(self) -> &'static str {
        match self {
            Self::High => "0",
            Self::Medium => "5",
            Self::Low => "9",
        }
    }

    /// yt-dlp `-f` selector capping the resolution.
    pub fn video_selector(self) -> &'static str {
        match self {
            Self::High => "best[height<=1080]",
            Self::Medium => "best[height<=720]",
            Self::Low => "best[height<=480]",
        }
    }
}

/// A validated request, ready to be turned into a downloader invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub url: String,
    pub format: OutputFormat,
    selection: Vec<String>,
}

impl DownloadPlan {
    /// Full argument list for one run writing to `output_template`. The URL
    /// goes last, after `--`, so it can never be read as an option.
    pub fn args(&self, output_template: &str) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-mtime".to_string(),
        ];
        args.extend(self.selection.iter().cloned());
        args.push("-o".to_string());
        args.push(output_template.to_string());
        args.push("--".to_string());
        args.push(self.url.clone());
        args
    }
}

impl ConvertRequest {
    pub fn validate(&self) -> Result<DownloadPlan, ConvertError> {
        let url = self
            .url
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or(ConvertError::InvalidInput("URL is required"))?;
        if !is_supported_url(url) {
            return Err(ConvertError::InvalidInput("Invalid YouTube URL"));
        }

        let format = OutputFormat::from_request(self.format.as_deref());
        let quality = QualityTier::parse(self.quality.as_deref());

        let selection = match format {
            OutputFormat::Audio => {
                let audio_quality = quality.unwrap_or(QualityTier::Low).audio_quality();
                vec![
                    "--extract-audio".to_string(),
                    "--audio-format".to_string(),
                    "mp3".to_string(),
                    "--audio-quality".to_string(),
                    audio_quality.to_string(),
                ]
            }
            OutputFormat::Video => {
                // The resolution table has no fallback entry. Rejecting here
                // replaces the old contract of running the tool with an
                // undefined selector and failing with a 500.
                let quality = quality.ok_or(ConvertError::InvalidInput("Invalid quality"))?;
                vec!["-f".to_string(), quality.video_selector().to_string()]
            }
        };

        Ok(DownloadPlan {
            url: url.to_string(),
            format,
            selection,
        })
    }
}

/// Accepts `http(s)://[www.]youtube.com/...` and `http(s)://[www.]youtu.be/...`
/// with something after the first slash. Scheme and host are matched
/// case-sensitively against the raw input; no trimming or normalization.
pub fn is_supported_url(input: &str) -> bool {
    let Some(rest) = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
    else {
        return false;
    };

    let Some((host, path)) = rest.split_once('/') else {
        return false;
    };
    if !SUPPORTED_HOSTS.contains(&host) || path.is_empty() || path.starts_with(['\r', '\n']) {
        return false;
    }

    // The tool still needs something it can parse as a URL.
    Url::parse(input).is_ok()
}

/// A downloaded file, read into memory.
#[derive(Debug)]
pub struct ConvertedMedia {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct Converter {
    ytdlp: YtDlp,
    workspace: Workspace,
    max_download_bytes: u64,
    stale_file_age: Duration,
}

impl Converter {
    /// A non-zero `stale_file_age` is raised to at least the tool timeout so
    /// the sweep never removes a job that may still be running.
    pub fn new(
        ytdlp: YtDlp,
        workspace: Workspace,
        max_download_bytes: u64,
        stale_file_age: Duration,
    ) -> Self {
        let stale_file_age = if stale_file_age.is_zero() {
            stale_file_age
        } else {
            stale_file_age.max(ytdlp.timeout())
        };

        Self {
            ytdlp,
            workspace,
            max_download_bytes,
            stale_file_age,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn stale_file_age(&self) -> Duration {
        self.stale_file_age
    }

    /// Runs the downloader for `plan` and returns the produced file. Job
    /// files are removed on every exit path, including cancellation.
    pub async fn convert(&self, plan: &DownloadPlan) -> Result<ConvertedMedia, ConvertError> {
        self.workspace
            .ensure_dir()
            .await
            .map_err(ConvertError::io("could not create download directory"))?;
        self.workspace.cleanup_stale_jobs(self.stale_file_age).await;

        let guard = JobGuard::new(self.workspace.clone(), self.workspace.new_job_prefix());
        info!(prefix = %guard.prefix, format = ?plan.format, url = %plan.url, "starting conversion");

        let result = self.download(&guard.prefix, plan).await;
        guard.release().await;

        if let Ok(media) = &result {
            info!(filename = %media.filename, bytes = media.bytes.len(), "conversion finished");
        }
        result
    }

    async fn download(
        &self,
        prefix: &str,
        plan: &DownloadPlan,
    ) -> Result<ConvertedMedia, ConvertError> {
        self.workspace
            .create_job_dir(prefix)
            .await
            .map_err(ConvertError::io("could not create job directory"))?;

        let args = plan.args(&self.workspace.output_template(prefix));
        self.ytdlp.run(args).await?;

        let path = self
            .workspace
            .find_output(prefix, Some(plan.format.preferred_extension()))
            .await
            .map_err(ConvertError::io("could not scan download directory"))?
            .ok_or(ConvertError::OutputNotFound)?;
        debug!("located output {:?}", path);

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(ConvertError::io("could not read downloaded file metadata"))?
            .len();
        if size > self.max_download_bytes {
            return Err(ConvertError::OutputTooLarge {
                size,
                limit: self.max_download_bytes,
            });
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(ConvertError::io("could not read downloaded file"))?;

        Ok(ConvertedMedia {
            bytes,
            content_type: plan.format.content_type(),
            filename: file_name(path),
        })
    }
}

fn file_name(path: PathBuf) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| "download.bin".to_string())
}

/// Owns a job prefix for the lifetime of one conversion. If dropped without
/// [`JobGuard::release`] (the request was cancelled), cleanup is spawned.
struct JobGuard {
    workspace: Workspace,
    prefix: String,
    armed: bool,
}

impl JobGuard {
    fn new(workspace: Workspace, prefix: String) -> Self {
        Self {
            workspace,
            prefix,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        self.workspace.remove_job(&self.prefix).await;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let workspace = self.workspace.clone();
        let prefix = std::mem::take(&mut self.prefix);
        handle.spawn(async move {
            workspace.remove_job(&prefix).await;
        });
    }
}
