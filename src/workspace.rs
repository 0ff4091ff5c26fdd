use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Every job directory starts with this stem; the stale sweep only touches these.
const JOB_STEM: &str = "video_";

/// Suffixes yt-dlp leaves behind for incomplete downloads.
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

/// The shared scratch directory. Each job writes into its own subdirectory
/// named after the job prefix, so one job never sees another job's files.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Allocates a prefix that is unique even for jobs started in the same
    /// clock tick.
    pub fn new_job_prefix(&self) -> String {
        format!(
            "{JOB_STEM}{}_{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        )
    }

    pub fn job_dir(&self, prefix: &str) -> PathBuf {
        self.dir.join(prefix)
    }

    pub async fn create_job_dir(&self, prefix: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.job_dir(prefix)).await
    }

    /// Output template handed to yt-dlp; the tool fills in the extension.
    pub fn output_template(&self, prefix: &str) -> String {
        self.job_dir(prefix)
            .join(format!("{prefix}.%(ext)s"))
            .to_string_lossy()
            .into_owned()
    }

    /// Finds the completed output file for `prefix`, preferring one with
    /// `preferred_ext` when the tool left several.
    pub async fn find_output(
        &self,
        prefix: &str,
        preferred_ext: Option<&str>,
    ) -> std::io::Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.job_dir(prefix)).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_job_file(name, prefix) || is_partial(name) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            candidates.push(entry.path());
        }

        candidates.sort();
        let preferred = preferred_ext.and_then(|ext| {
            candidates
                .iter()
                .position(|path| path.extension().is_some_and(|value| value == ext))
        });

        Ok(match preferred {
            Some(index) => Some(candidates.swap_remove(index)),
            None => candidates.into_iter().next(),
        })
    }

    /// Deletes the job directory for `prefix` with everything in it.
    pub async fn remove_job(&self, prefix: &str) {
        let job_dir = self.job_dir(prefix);
        match tokio::fs::remove_dir_all(&job_dir).await {
            Ok(()) => debug!("removed job directory {:?}", job_dir),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove job directory {:?}: {error}", job_dir),
        }
    }

    /// Removes job directories older than `older_than`, left over by crashed
    /// runs. Age is the directory's own mtime, which the downloader does not
    /// rewrite. A zero duration disables the sweep.
    pub async fn cleanup_stale_jobs(&self, older_than: Duration) {
        if older_than.is_zero() {
            return;
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("could not open {:?} for stale cleanup: {error}", self.dir);
                }
                return;
            }
        };

        let now = std::time::SystemTime::now();
        let mut removed = 0usize;

        loop {
            let maybe_entry = match entries.next_entry().await {
                Ok(value) => value,
                Err(error) => {
                    warn!("could not iterate {:?} for stale cleanup: {error}", self.dir);
                    break;
                }
            };

            let Some(entry) = maybe_entry else {
                break;
            };

            if !entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(JOB_STEM))
            {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified_at| now.duration_since(modified_at).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => warn!("could not remove stale job {:?}: {error}", path),
            }
        }

        if removed > 0 {
            info!("removed {removed} stale job(s) from {:?}", self.dir);
        }
    }
}

fn is_job_file(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn write_job_files(workspace: &Workspace, prefix: &str, names: &[&str]) {
        workspace.create_job_dir(prefix).await.expect("job dir");
        for name in names {
            tokio::fs::write(workspace.job_dir(prefix).join(name), b"data")
                .await
                .expect("write");
        }
    }

    #[test]
    fn prefixes_do_not_collide() {
        let workspace = Workspace::new("/tmp/unused");
        let first = workspace.new_job_prefix();
        let second = workspace.new_job_prefix();

        assert!(first.starts_with(JOB_STEM));
        assert_ne!(first, second);
    }

    #[test]
    fn job_file_match_requires_extension_separator() {
        assert!(is_job_file("video_1_abc.mp3", "video_1_abc"));
        assert!(is_job_file("video_1_abc.f137.mp4.part", "video_1_abc"));
        assert!(!is_job_file("video_1_abcd.mp3", "video_1_abc"));
        assert!(!is_job_file("other.mp3", "video_1_abc"));
    }

    #[test]
    fn output_template_lives_in_job_dir() {
        let workspace = Workspace::new("/tmp/downloads");
        assert_eq!(
            workspace.output_template("video_x"),
            "/tmp/downloads/video_x/video_x.%(ext)s"
        );
    }

    #[tokio::test]
    async fn find_output_skips_partials_and_prefers_extension() {
        let temp_dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(temp_dir.path());
        write_job_files(
            &workspace,
            "video_job",
            &["video_job.webm", "video_job.mp3", "video_job.mp4.part"],
        )
        .await;
        write_job_files(&workspace, "video_other", &["video_other.mp3"]).await;

        let job_dir = workspace.job_dir("video_job");
        let found = workspace.find_output("video_job", Some("mp3")).await.unwrap();
        assert_eq!(found, Some(job_dir.join("video_job.mp3")));

        let found = workspace.find_output("video_job", None).await.unwrap();
        assert_eq!(found, Some(job_dir.join("video_job.mp3")));

        let found = workspace.find_output("video_missing", None).await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn remove_job_leaves_other_jobs() {
        let temp_dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(temp_dir.path());
        write_job_files(&workspace, "video_a", &["video_a.mp4", "video_a.mp4.part"]).await;
        write_job_files(&workspace, "video_b", &["video_b.mp4"]).await;

        workspace.remove_job("video_a").await;
        workspace.remove_job("video_never_created").await;

        assert!(!workspace.job_dir("video_a").exists());
        assert!(workspace.job_dir("video_b").join("video_b.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_sweep_ignores_backdated_files_inside_live_jobs() {
        let temp_dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(temp_dir.path());
        write_job_files(&workspace, "video_live", &["video_live.mp4"]).await;
        let status = std::process::Command::new("touch")
            .args(["-t", "200001010000"])
            .arg(workspace.job_dir("video_live").join("video_live.mp4"))
            .status()
            .expect("run touch");
        assert!(status.success());

        workspace.cleanup_stale_jobs(Duration::from_secs(60)).await;

        assert!(workspace.job_dir("video_live").join("video_live.mp4").exists());
    }

    #[tokio::test]
    async fn stale_sweep_only_touches_old_jobs() {
        let temp_dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(temp_dir.path());
        write_job_files(&workspace, "video_old", &["video_old.mp4"]).await;
        tokio::fs::write(temp_dir.path().join("unrelated.txt"), b"data")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(50)).await;

        workspace.cleanup_stale_jobs(Duration::ZERO).await;
        assert!(workspace.job_dir("video_old").exists());

        workspace.cleanup_stale_jobs(Duration::from_millis(10)).await;
        assert!(!workspace.job_dir("video_old").exists());
        assert!(temp_dir.path().join("unrelated.txt").exists());
    }
}
