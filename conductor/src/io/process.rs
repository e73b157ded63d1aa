//! Child process execution with bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished child left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes drained from stdout/stderr but not kept.
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

type Capture = JoinHandle<Result<(Vec<u8>, usize)>>;

/// Spawn `cmd`, feed `stdin`, and wait for it to exit.
///
/// stdout and stderr are drained on their own threads so a chatty child can
/// never block on a full pipe; at most `output_limit_bytes` of each is kept.
/// With `timeout` set, a child still running when it elapses is killed and
/// reported with `timed_out`. A spawn failure is returned as `Err`.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = capture(child.stdout.take(), output_limit_bytes, "stdout")?;
    let stderr = capture(child.stderr.take(), output_limit_bytes, "stderr")?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(err) = pipe.write_all(input) {
            // The child may exit without reading everything; its status tells the story.
            warn!(err = %err, "child closed stdin early");
        }
    }

    let (status, timed_out) = wait(&mut child, timeout)?;

    let (stdout, stdout_dropped) = join(stdout).context("join stdout")?;
    let (stderr, stderr_dropped) = join(stderr).context("join stderr")?;
    let truncated_bytes = stdout_dropped + stderr_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated_bytes,
        timed_out,
    })
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait().context("wait for command")?, false));
    };
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            Ok((child.wait().context("wait command after kill")?, true))
        }
    }
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>, limit: usize, name: &str) -> Result<Capture> {
    let reader = pipe.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || read_limited(reader, limit)))
}

fn join(handle: Capture) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let out = run_command(sh("cat"), Some(b"hello"), None, 1024).expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy(), "hello");
        assert!(!out.timed_out);
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_command(sh("printf 'abcdefghij'"), None, None, 4).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.truncated_bytes, 6);
    }

    #[test]
    fn reports_failure_through_status() {
        let out = run_command(sh("echo oops >&2; exit 3"), None, None, 1024).expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stderr_lossy().trim(), "oops");
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command(sh("sleep 5"), None, Some(Duration::from_millis(100)), 1024)
            .expect("run");
        assert!(out.timed_out);
    }

    #[test]
    fn missing_binary_is_an_error() {
        let cmd = Command::new("/nonexistent/conductor-agent");
        assert!(run_command(cmd, None, None, 1024).is_err());
    }
}
