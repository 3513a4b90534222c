//! Subprocess execution with byte-capped, tail-preserving capture and
//! cooperative cancellation, grounded on the teacher's `cli_executor`
//! child-process plumbing generalized to arbitrary shell commands instead
//! of a fixed CLI binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::types::{ExecError, ExecOutcome, ExecRequest, ExecStatus};

/// Grace window between SIGTERM and SIGKILL on cancellation/timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

struct CapturedStream {
    path: PathBuf,
    tail: String,
    bytes: u64,
    truncated: bool,
}

async fn capture_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    path: PathBuf,
    byte_cap: usize,
) -> std::io::Result<CapturedStream> {
    let mut file = File::create(&path).await?;
    let mut tail_buf: Vec<u8> = Vec::with_capacity(byte_cap.min(1 << 20));
    let mut total: u64 = 0;
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n]).await?;
        total += n as u64;

        tail_buf.extend_from_slice(&chunk[..n]);
        if tail_buf.len() > byte_cap {
            let overflow = tail_buf.len() - byte_cap;
            tail_buf.drain(0..overflow);
            truncated = true;
        }
    }
    file.sync_all().await?;

    Ok(CapturedStream {
        path,
        tail: String::from_utf8_lossy(&tail_buf).into_owned(),
        bytes: total,
        truncated,
    })
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

/// Run `req` to completion, cancellation, or timeout. Never returns an
/// `Err` for the child process itself failing — a nonzero exit is a
/// `Failure` outcome, not an `ExecError`. `ExecError` is reserved for
/// conditions that mean the command never ran at all.
pub async fn run(req: ExecRequest, cancel: CancellationToken) -> Result<ExecOutcome, ExecError> {
    let tokens = shlex::split(&req.command).ok_or_else(|| ExecError::Tokenize(req.command.clone()))?;
    let (program, args) = tokens.split_first().ok_or(ExecError::EmptyCommand)?;

    tokio::fs::create_dir_all(&req.artifact_dir)
        .await
        .map_err(ExecError::Spawn)?;
    let stdout_path = artifact_path(&req.artifact_dir, "stdout.log");
    let stderr_path = artifact_path(&req.artifact_dir, "stderr.log");

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&req.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &req.env {
        command.env(key, value);
    }

    let started = Instant::now();
    let mut child = command.spawn()?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(capture_stream(stdout, stdout_path.clone(), req.byte_cap));
    let stderr_task = tokio::spawn(capture_stream(stderr, stderr_path.clone(), req.byte_cap));

    let outcome_kind = tokio::select! {
        result = child.wait() => Outcome::Exited(result),
        _ = tokio::time::sleep(req.timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Canceled,
    };

    let (status, exit_code, signal, error_message) = match outcome_kind {
        Outcome::Exited(Ok(exit_status)) => {
            #[cfg(unix)]
            let signal = {
                use std::os::unix::process::ExitStatusExt;
                exit_status.signal()
            };
            #[cfg(not(unix))]
            let signal = None;
            if exit_status.success() {
                (ExecStatus::Success, exit_status.code(), signal, None)
            } else {
                (ExecStatus::Failure, exit_status.code(), signal, None)
            }
        }
        Outcome::Exited(Err(err)) => (
            ExecStatus::Failure,
            None,
            None,
            Some(format!("failed to wait on child: {err}")),
        ),
        Outcome::TimedOut => {
            terminate(&mut child).await;
            (
                ExecStatus::Timeout,
                None,
                None,
                Some(format!("timed out after {:?}", req.timeout)),
            )
        }
        Outcome::Canceled => {
            terminate(&mut child).await;
            (ExecStatus::Canceled, None, None, Some("canceled".to_string()))
        }
    };

    let stdout_captured = stdout_task
        .await
        .map_err(|e| ExecError::Spawn(std::io::Error::other(e)))?
        .map_err(ExecError::Spawn)?;
    let stderr_captured = stderr_task
        .await
        .map_err(|e| ExecError::Spawn(std::io::Error::other(e)))?
        .map_err(ExecError::Spawn)?;

    Ok(ExecOutcome {
        status,
        exit_code,
        signal,
        stdout_path: stdout_captured.path,
        stderr_path: stderr_captured.path,
        stdout_tail: stdout_captured.tail,
        stderr_tail: stderr_captured.tail,
        stdout_bytes: stdout_captured.bytes,
        stderr_bytes: stderr_captured.bytes,
        truncated: stdout_captured.truncated || stderr_captured.truncated,
        duration: started.elapsed(),
        error_message,
    })
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Canceled,
}

async fn terminate(child: &mut Child) {
    send_sigterm(child);
    let grace = tokio::time::sleep(KILL_GRACE);
    tokio::select! {
        _ = child.wait() => {}
        _ = grace => {
            tracing::warn!("process did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
        }
    }
}

fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest {
            artifact_dir: dir.path().to_path_buf(),
            ..ExecRequest::new("echo hello", dir.path())
        };
        let outcome = run(req, CancellationToken::new()).await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout_tail.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest {
            artifact_dir: dir.path().to_path_buf(),
            ..ExecRequest::new("false", dir.path())
        };
        let outcome = run(req, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, ExecStatus::Failure);
        assert_ne!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn cancellation_marks_outcome_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest {
            artifact_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(30),
            ..ExecRequest::new("sleep 5", dir.path())
        };
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token_clone.cancel();
        });

        let outcome = run(req, token).await.unwrap();
        assert_eq!(outcome.status, ExecStatus::Canceled);
    }

    #[tokio::test]
    async fn timeout_marks_outcome_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest {
            artifact_dir: dir.path().to_path_buf(),
            timeout: Duration::from_millis(50),
            ..ExecRequest::new("sleep 5", dir.path())
        };
        let outcome = run(req, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, ExecStatus::Timeout);
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest::new("", dir.path());
        let err = run(req, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn output_beyond_byte_cap_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecRequest {
            artifact_dir: dir.path().to_path_buf(),
            byte_cap: 8,
            ..ExecRequest::new("printf '0123456789'", dir.path())
        };
        let outcome = run(req, CancellationToken::new()).await.unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.stdout_tail, "23456789");
    }
}
