//! Child process execution with a hard timeout and bounded output capture.
//!
//! On Unix every child leads its own process group. A timeout kills the whole
//! group, so a descendant that inherited the output pipes (a credential plugin,
//! a backgrounded helper) cannot keep the caller waiting past the deadline.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long the output pipes may stay open after the child itself has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout as lossy UTF-8 with a trailing truncation notice when needed.
    pub fn stdout_text(&self) -> String {
        render_stream(&self.stdout, self.stdout_truncated, "stdout")
    }

    /// Stderr as lossy UTF-8 with a trailing truncation notice when needed.
    pub fn stderr_text(&self) -> String {
        render_stream(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn render_stream(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).trim().to_string();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]"));
    }
    text
}

/// Bytes kept from one stream plus the count of bytes dropped past the limit.
#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Run `cmd` for at most `timeout`, capturing at most `output_limit_bytes` of
/// each stream.
///
/// Both pipes are drained on reader threads while the child runs. The call
/// returns within roughly `timeout` plus two drain grace periods, whatever the
/// child's descendants do with the pipes. Spawn failures keep the underlying
/// [`std::io::Error`] in the error chain.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing process group"
            );
            (terminate(&mut child)?, true)
        }
    };

    let mut open = await_readers(&done_rx, 2)?;
    if open > 0 {
        warn!(open, "output pipes held by descendants, killing process group");
        kill_group(&child);
        open = await_readers(&done_rx, open)?;
        if open > 0 {
            warn!(open, "abandoning output readers");
        }
    }

    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn terminate(child: &mut Child) -> Result<ExitStatus> {
    kill_group(child);
    if let Err(err) = child.kill() {
        debug!(%err, "direct kill after group kill failed");
    }
    child.wait().context("wait command after kill")
}

/// SIGKILL every process left in the child's group. The group outlives the
/// leader, so this also reaches descendants after the child has been reaped.
#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(%errno, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn spawn_reader<R>(reader: R, limit: usize, done: Sender<Result<()>>) -> SharedCapture
where
    R: Read + Send + 'static,
{
    let capture = SharedCapture::default();
    let sink = Arc::clone(&capture);
    thread::spawn(move || {
        // The receiver is gone once the readers have been abandoned.
        let _ = done.send(drain_limited(reader, limit, &sink));
    });
    capture
}

/// Wait up to [`PIPE_DRAIN_GRACE`] for `open` readers to hit end of stream.
/// Returns how many are still open.
fn await_readers(done: &Receiver<Result<()>>, mut open: usize) -> Result<usize> {
    let deadline = Instant::now() + PIPE_DRAIN_GRACE;
    while open > 0 {
        let left = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(left) {
            Ok(result) => {
                result?;
                open -= 1;
            }
            Err(_) => break,
        }
    }
    Ok(open)
}

fn drain_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = n.min(limit.saturating_sub(capture.kept.len()));
        capture.kept.extend_from_slice(&chunk[..keep]);
        capture.dropped += n - keep;
    }
}

fn take_capture(capture: &Mutex<Capture>) -> (Vec<u8>, usize) {
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    (std::mem::take(&mut capture.kept), capture.dropped)
}
