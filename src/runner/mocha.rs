use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::collector::TestEvent;

use super::{EventSource, forward_lines, read_line_lossy};

/// Guard that kills the child process (and its entire process group) on drop.
struct ChildGuard {
    child: Option<tokio::process::Child>,
    /// Process group ID saved at spawn time so we can kill the whole group.
    #[cfg(unix)]
    pgid: Option<u32>,
}

impl ChildGuard {
    fn new(child: tokio::process::Child) -> Self {
        #[cfg(unix)]
        let pgid = child.id();
        Self {
            child: Some(child),
            #[cfg(unix)]
            pgid,
        }
    }

    /// Wait for a normal exit and disarm the guard.
    async fn wait(&mut self) -> Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let status = child.wait().await.context("failed to wait for mocha")?;
        self.child = None;
        #[cfg(unix)]
        {
            self.pgid = None;
        }
        Ok(status.code())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        // Kill the entire process group so mocha's workers don't become orphans.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        }
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

const REPORTER_SOURCE: &str = include_str!("../../reporters/mocha-ndjson-reporter.js");

/// Runs mocha with an embedded NDJSON reporter and streams its events.
pub struct MochaRunner {
    workspace: PathBuf,
    args: Vec<String>,
}

impl MochaRunner {
    pub fn new(workspace: PathBuf, args: Vec<String>) -> Self {
        Self { workspace, args }
    }

    /// Write the embedded reporter to a temp file and return its path.
    fn write_reporter(&self) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("ci-slack-reporter-")
            .suffix(".js")
            .tempfile()
            .context("failed to create temp reporter file")?;

        use std::io::Write;
        file.write_all(REPORTER_SOURCE.as_bytes())
            .context("failed to write reporter to temp file")?;

        Ok(file)
    }

    fn command(&self, reporter: &tempfile::NamedTempFile) -> Command {
        let mut cmd = Command::new("npx");
        cmd.arg("mocha")
            .arg("--reporter")
            .arg(reporter.path())
            .args(&self.args);
        cmd
    }
}

#[async_trait]
impl EventSource for MochaRunner {
    async fn stream(&self, tx: mpsc::UnboundedSender<TestEvent>) -> Result<Option<i32>> {
        let reporter_file = self.write_reporter()?;
        let mut cmd = self.command(&reporter_file);
        tracing::debug!(cmd = ?cmd.as_std(), cwd = %self.workspace.display(), "spawning mocha");

        // Own process group, so killing it (via ChildGuard) also takes out any workers.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.as_std_mut().process_group(0);
        }

        let mut child = cmd
            .current_dir(&self.workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .context("failed to spawn mocha")?;

        let stdout = child.stdout.take().context("missing stdout")?;
        let stderr = child.stderr.take().context("missing stderr")?;
        let mut child_guard = ChildGuard::new(child);

        let tx_err = tx.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            while let Some(line) = read_line_lossy(&mut reader).await {
                let line = line.trim_end().to_string();
                let _ = tx_err.send(TestEvent::Output { line });
            }
        });

        forward_lines(BufReader::new(stdout), &tx).await;
        stderr_handle.await.ok();

        let code = child_guard.wait().await?;
        // Keep the temp file alive until mocha exits
        drop(reporter_file);

        if code != Some(0) {
            tracing::info!(code = ?code, "mocha exited with failures");
        }
        Ok(code)
    }

    fn name(&self) -> &str {
        "mocha"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_passes_reporter_before_user_args() {
        let runner = MochaRunner::new(PathBuf::from("/repo"), vec!["--recursive".into(), "test".into()]);
        let reporter = runner.write_reporter().unwrap();
        let cmd = runner.command(&reporter);

        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[0], "mocha");
        assert_eq!(args[1], "--reporter");
        assert_eq!(args[2], reporter.path().to_string_lossy());
        assert_eq!(&args[3..], ["--recursive", "test"]);
    }

    #[test]
    fn reporter_file_contains_embedded_source() {
        let runner = MochaRunner::new(PathBuf::from("."), Vec::new());
        let reporter = runner.write_reporter().unwrap();
        let written = std::fs::read_to_string(reporter.path()).unwrap();
        assert_eq!(written, REPORTER_SOURCE);
        assert!(written.contains("run-end"));
    }
}
