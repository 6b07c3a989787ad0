//! Subprocess execution for a single job iteration

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

/// Default shell used to interpret launch commands
pub const DEFAULT_SHELL: &str = "sh";

/// Runs a job's launch command through a shell
#[derive(Debug, Clone)]
pub struct JobRunner {
    shell: String,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl JobRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    /// Run `command` to completion in `cwd` and return its captured output
    ///
    /// Stdout wins when non-empty, otherwise stderr. A failure to spawn or
    /// wait is returned as an `Ошибка: ...` string rather than an error.
    pub async fn run(&self, command: &str, cwd: &Path) -> String {
        debug!(%command, ?cwd, "JobRunner::run: called");
        match self.execute(command, cwd).await {
            Ok(output) => {
                debug!(status = ?output.status, "JobRunner::run: command completed");
                select_output(&output)
            }
            Err(e) => {
                debug!(error = %e, "JobRunner::run: failed to execute command");
                format!("Ошибка: {}", e)
            }
        }
    }

    async fn execute(&self, command: &str, cwd: &Path) -> std::io::Result<Output> {
        Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }
}

fn select_output(output: &Output) -> String {
    if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let temp = tempdir().unwrap();
        let output = JobRunner::default().run("echo hello", temp.path()).await;
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn test_run_prefers_stdout_over_stderr() {
        let temp = tempdir().unwrap();
        let output = JobRunner::default().run("echo out; echo err >&2", temp.path()).await;
        assert_eq!(output, "out\n");
    }

    #[tokio::test]
    async fn test_run_falls_back_to_stderr() {
        let temp = tempdir().unwrap();
        let output = JobRunner::default().run("echo oops >&2; exit 3", temp.path()).await;
        assert_eq!(output, "oops\n");
    }

    #[tokio::test]
    async fn test_run_uses_job_directory() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("data.txt"), "from file").unwrap();
        let output = JobRunner::default().run("cat data.txt", temp.path()).await;
        assert_eq!(output, "from file");
    }

    #[tokio::test]
    async fn test_run_missing_directory_is_formatted_error() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("gone");
        let output = JobRunner::default().run("echo hi", &missing).await;
        assert!(output.starts_with("Ошибка: "), "unexpected output: {output}");
    }

    #[tokio::test]
    async fn test_run_missing_shell_is_formatted_error() {
        let temp = tempdir().unwrap();
        let output = JobRunner::new("/nonexistent/shell").run("echo hi", temp.path()).await;
        assert!(output.starts_with("Ошибка: "));
    }

    #[tokio::test]
    async fn test_run_silent_command_is_empty() {
        let temp = tempdir().unwrap();
        assert_eq!(JobRunner::default().run("true", temp.path()).await, "");
    }
}
