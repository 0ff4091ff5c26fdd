use std::{
    io::ErrorKind,
    path::PathBuf,
    process::{Output, Stdio},
};

use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::{debug, warn};

use crate::convert::ConvertError;

/// Invokes the external downloader with a bounded wall-clock time.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the tool with `args` passed verbatim as an argument list.
    ///
    /// On unix the tool gets its own process group, and the whole group
    /// (postprocessors included) is killed once the run ends, times out, or
    /// the returned future is dropped.
    pub async fn run(&self, args: Vec<String>) -> Result<Output, ConvertError> {
        debug!(program = ?self.program, ?args, "running yt-dlp");

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ConvertError::ExternalToolFailure(format!(
                    "{} is not installed or not on PATH",
                    self.program.display()
                ))
            } else {
                ConvertError::ExternalToolFailure(format!(
                    "could not start {}: {error}",
                    self.program.display()
                ))
            }
        })?;
        let _group = ProcessGroup::new(child.id());

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConvertError::Timeout(self.timeout))?
            .map_err(|error| {
                ConvertError::ExternalToolFailure(format!(
                    "could not collect output of {}: {error}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "yt-dlp exited unsuccessfully"
            );
            return Err(ConvertError::ExternalToolFailure(run_error_message(
                &output.stderr,
            )));
        }

        Ok(output)
    }
}

/// Kills the tool's process group on drop.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        kill_group(self.pgid);
    }
}

#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|pgid| libc::pid_t::try_from(pgid).ok()) else {
        return;
    };
    // ESRCH just means every member has already exited.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

/// Picks the last meaningful stderr line as the user-facing diagnostic.
fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp exited with an error")
        .to_string()
}
