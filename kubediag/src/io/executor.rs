//! Command executor abstraction for inspection commands.
//!
//! The [`CommandExecutor`] trait decouples the diagnosis loop from process
//! spawning. Tests use scripted executors that return predetermined results
//! without touching a cluster.
//!
//! Executors never fail the session: a missing binary, a non-zero exit, a
//! timeout, or a malformed command line all come back as a failed
//! [`CommandResult`] whose stderr describes what happened.

use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::types::CommandResult;
use crate::io::process::run_command_with_timeout;

/// Abstraction over inspection-command execution.
pub trait CommandExecutor {
    /// Run `command` (a single shell-style line), waiting at most `timeout`.
    fn execute(&self, command: &str, timeout: Duration) -> CommandResult;
}

/// Executor that tokenizes the command with POSIX word-splitting rules and
/// spawns the resulting argv directly, without a shell.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    output_limit_bytes: usize,
}

impl ProcessExecutor {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl CommandExecutor for ProcessExecutor {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    fn execute(&self, command: &str, timeout: Duration) -> CommandResult {
        info!(command, "executing command");

        let argv = match tokenize(command) {
            Ok(argv) => argv,
            Err(message) => {
                warn!(command, %message, "cannot tokenize command");
                return CommandResult::failure(message);
            }
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);

        let output = match run_command_with_timeout(cmd, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                let not_found = err
                    .chain()
                    .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
                    .any(|io_err| io_err.kind() == ErrorKind::NotFound);
                warn!(command, err = %format!("{err:#}"), not_found, "command could not run");
                let message = if not_found {
                    format!("Error: Command not found: {}: {err:#}", argv[0])
                } else {
                    format!("Error while executing command: {err:#}")
                };
                return CommandResult::failure(message);
            }
        };

        let stdout = output.stdout_text();
        let mut stderr = output.stderr_text();

        if output.timed_out {
            warn!(command, timeout_secs = timeout.as_secs(), "command timed out");
            let notice = format!("Error: command timed out after {}s", timeout.as_secs_f64());
            stderr = if stderr.is_empty() {
                notice
            } else {
                format!("{stderr}\n{notice}")
            };
            return CommandResult {
                stdout,
                stderr,
                succeeded: false,
            };
        }

        let succeeded = output.status.success();
        if !succeeded && stderr.is_empty() {
            stderr = describe_exit(&output.status);
        }
        debug!(command, exit_code = ?output.status.code(), succeeded, "command completed");
        CommandResult {
            stdout,
            stderr,
            succeeded,
        }
    }
}

/// Split `command` into an argv using POSIX shell quoting rules.
pub fn tokenize(command: &str) -> Result<Vec<String>, String> {
    let argv = shlex::split(command)
        .ok_or_else(|| format!("Error: cannot parse command (unbalanced quotes?): {command}"))?;
    if argv.is_empty() {
        return Err("Error: empty command".to_string());
    }
    Ok(argv)
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Error: command exited with status {code}"),
        None => "Error: command terminated by signal".to_string(),
    }
}
