//! Shell command execution with timeout and bounded output.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Cap on captured stdout/stderr, each. Bytes beyond this are discarded
/// while the pipe keeps draining.
const OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

/// Result of a shell command execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Run `sh -c <command>` in `cwd` with a timeout.
///
/// On timeout the process group is killed and partial output is returned
/// with `timed_out = true`. Output is read concurrently with the child to
/// avoid pipe deadlocks.
pub async fn execute_shell(
    command: &str,
    cwd: &Path,
    timeout_secs: u64,
) -> anyhow::Result<ExecResult> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_task = tokio::spawn(read_limited(stdout));
    let stderr_task = tokio::spawn(read_limited(stderr));

    let mut timed_out = false;
    let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await
    {
        Ok(status) => Some(status?),
        Err(_) => {
            timed_out = true;
            let _ = child.kill().await;
            None
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ExecResult {
        stdout,
        stderr,
        exit_code: status.and_then(|s| s.code()),
        timed_out,
    })
}

/// Drain a stream, keeping at most [`OUTPUT_LIMIT_BYTES`] of it.
async fn read_limited<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let remaining = OUTPUT_LIMIT_BYTES.saturating_sub(kept.len());
                let keep = n.min(remaining);
                kept.extend_from_slice(&chunk[..keep]);
            }
        }
    }
    String::from_utf8_lossy(&kept).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let tmp = TempDir::new().unwrap();
        let result = execute_shell("echo hi", tmp.path(), 10).await.unwrap();
        assert_eq!(result.stdout.trim(), "hi");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = execute_shell("exit 3", tmp.path(), 10).await.unwrap();
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_kills_and_flags() {
        let tmp = TempDir::new().unwrap();
        let result = execute_shell("sleep 30", tmp.path(), 1).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn runs_in_given_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let result = execute_shell("ls", tmp.path(), 10).await.unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }
}
