//! Running external programs (curl, gpg) with piped stdio.
//!
//! A non-zero exit is always surfaced to the caller; nothing here treats a
//! partially successful child as success.

use std::process::{ExitStatus, Stdio};

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::core::ChunkStream;
use crate::error::{MoverError, Result};

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    /// Failure description when the child did not exit cleanly.
    pub fn failure(&self, program: &str) -> Option<String> {
        (!self.status.success()).then(|| failure_message(program, self.status, &self.stderr))
    }
}

/// Program name of a command, for messages.
pub fn program_name(command: &Command) -> String {
    command.as_std().get_program().to_string_lossy().into_owned()
}

/// Run `command` to completion, feeding `input` to its stdin.
///
/// The stdin writer and the output collector run concurrently so a child that
/// streams output while reading input cannot deadlock on a full pipe.
pub async fn capture(mut command: Command, input: Option<&[u8]>) -> std::io::Result<Captured> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}", program_name(&command));
    let mut child = command.spawn()?;
    let stdin = child.stdin.take();

    let feed = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;

    // A child that exits early closes its stdin; report its status rather
    // than the broken pipe.
    if output.status.success() {
        fed?;
    }

    Ok(Captured {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Stream a spawned child's stdout, then wait for it and fail on a non-zero exit.
///
/// The child must have been spawned with piped stdout and stderr.
pub fn child_stdout_chunks<'a>(
    mut child: Child,
    program: &str,
    endpoint: String,
) -> Result<ChunkStream<'a>> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MoverError::transport(&endpoint, "child stdout is not piped"))?;
    let stderr = child.stderr.take();

    let state = Some(Piped {
        out: ReaderStream::new(stdout),
        child,
        stderr,
        program: program.to_string(),
        endpoint,
    });

    Ok(stream::try_unfold(state, next_chunk).boxed())
}

struct Piped {
    out: ReaderStream<tokio::process::ChildStdout>,
    child: Child,
    stderr: Option<ChildStderr>,
    program: String,
    endpoint: String,
}

async fn next_chunk(state: Option<Piped>) -> Result<Option<(Bytes, Option<Piped>)>> {
    let Some(mut piped) = state else {
        return Ok(None);
    };

    match piped.out.try_next().await? {
        Some(chunk) => Ok(Some((chunk, Some(piped)))),
        None => {
            let status = piped.child.wait().await?;
            let stderr = read_stderr(piped.stderr.take()).await;
            if !status.success() {
                return Err(MoverError::transport(
                    piped.endpoint,
                    failure_message(&piped.program, status, &stderr),
                ));
            }
            Ok(None)
        }
    }
}

/// Drain a child's stderr after it exited.
pub async fn read_stderr(stderr: Option<ChildStderr>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_end(&mut buffer).await;
    }
    buffer
}

/// Human-readable failure for a child exit status.
pub fn failure_message(program: &str, status: ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    match (status.code(), stderr.is_empty()) {
        (Some(code), true) => format!("{} exited with status {}", program, code),
        (Some(code), false) => format!("{} exited with status {}: {}", program, code, stderr),
        (None, _) => format!("{} was terminated by a signal", program),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_feeds_stdin() {
        let captured = capture(Command::new("cat"), Some(b"hello\n")).await.unwrap();
        assert!(captured.failure("cat").is_none());
        assert_eq!(captured.stdout, b"hello\n");
    }

    #[tokio::test]
    async fn test_capture_reports_failure() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo boom >&2; exit 3"]);
        let captured = capture(command, None).await.unwrap();
        let failure = captured.failure("sh").unwrap();
        assert!(failure.contains("status 3"));
        assert!(failure.contains("boom"));
    }

    #[tokio::test]
    async fn test_child_stream_fails_on_nonzero_exit() {
        let mut command = Command::new("sh");
        command
            .args(["-c", "printf 'a\\nb\\n'; exit 7"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().unwrap();
        let chunks = child_stdout_chunks(child, "sh", "sh".into()).unwrap();
        let collected: Result<Vec<Bytes>> = chunks.try_collect().await;
        assert!(matches!(collected, Err(MoverError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_child_stream_success() {
        let mut command = Command::new("sh");
        command
            .args(["-c", "printf 'a\\nb\\n'"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().unwrap();
        let chunks: Vec<Bytes> = child_stdout_chunks(child, "sh", "sh".into())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, b"a\nb\n");
    }
}
