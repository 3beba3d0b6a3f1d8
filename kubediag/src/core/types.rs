//! Shared deterministic types for diagnosis core logic.
//!
//! These types define stable contracts between the loop, the reasoning backend
//! and the command executor. They carry no I/O and serialize deterministically
//! so a finished session can be emitted as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::transcript::Transcript;

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged entry of the conversation with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Captured result of running one inspection command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            succeeded: true,
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            succeeded: false,
        }
    }
}

/// Record of a command the loop actually executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCommand {
    pub text: String,
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
}

impl IssuedCommand {
    pub fn new(text: impl Into<String>, result: CommandResult) -> Self {
        Self {
            text: text.into(),
            stdout: result.stdout,
            stderr: result.stderr,
            succeeded: result.succeeded,
        }
    }
}

/// Classification of one assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// The message is the final findings table.
    Report,
    /// The message proposes this inspection command (first matching line only).
    Command(String),
    /// Neither a report nor a command.
    Stall,
}

/// Why a session ended without a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// The backend produced neither a command nor a report.
    NoActionableOutput,
    /// The backend kept re-proposing commands that were already executed.
    RepeatedProposal { consecutive: u32 },
    /// The configured maximum number of cycles was reached.
    CycleBudgetExhausted { max_cycles: u32 },
    /// The backend failed on too many consecutive calls.
    BackendFailures { consecutive: u32, last_error: String },
    /// The session wall-clock budget ran out.
    SessionTimedOut,
    /// An operator cancelled the session.
    Cancelled,
}

impl AbortReason {
    /// Whether the session ended because of a hard failure rather than the
    /// conversation running out of steps.
    pub fn is_failure(&self) -> bool {
        matches!(self, AbortReason::BackendFailures { .. })
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NoActionableOutput => {
                write!(f, "incomplete: no further action proposed")
            }
            AbortReason::RepeatedProposal { consecutive } => write!(
                f,
                "incomplete: backend re-proposed already executed commands {consecutive} times in a row"
            ),
            AbortReason::CycleBudgetExhausted { max_cycles } => {
                write!(f, "incomplete: cycle budget of {max_cycles} exhausted")
            }
            AbortReason::BackendFailures {
                consecutive,
                last_error,
            } => write!(
                f,
                "failed: backend failed {consecutive} consecutive times (last error: {last_error})"
            ),
            AbortReason::SessionTimedOut => write!(f, "incomplete: session timed out"),
            AbortReason::Cancelled => write!(f, "cancelled by operator"),
        }
    }
}

/// Terminal state of a diagnosis session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Aborted(AbortReason),
}

/// Everything a caller receives once the loop terminates.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub outcome: Outcome,
    /// Final findings table, present only when `outcome` is `Done`.
    pub report: Option<String>,
    /// Executed commands in execution order, never containing duplicates.
    pub issued_commands: Vec<IssuedCommand>,
    pub transcript: Transcript,
    /// Number of backend calls made.
    pub cycles: u32,
}

impl SessionOutcome {
    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reason_display_distinguishes_incomplete_from_failed() {
        assert_eq!(
            AbortReason::NoActionableOutput.to_string(),
            "incomplete: no further action proposed"
        );
        let failed = AbortReason::BackendFailures {
            consecutive: 3,
            last_error: "Network error: connection refused".to_string(),
        };
        assert!(failed.to_string().starts_with("failed:"));
        assert!(failed.is_failure());
        assert!(!AbortReason::Cancelled.is_failure());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let done = serde_json::to_value(Outcome::Done).expect("serialize");
        assert_eq!(done, serde_json::json!({ "status": "done" }));

        let aborted = serde_json::to_value(Outcome::Aborted(AbortReason::CycleBudgetExhausted {
            max_cycles: 5,
        }))
        .expect("serialize");
        assert_eq!(aborted["status"], "aborted");
    }

    #[test]
    fn issued_command_copies_result_fields() {
        let issued = IssuedCommand::new("kubectl get nodes", CommandResult::failure("boom"));
        assert_eq!(issued.text, "kubectl get nodes");
        assert_eq!(issued.stderr, "boom");
        assert!(issued.stdout.is_empty());
        assert!(!issued.succeeded);
    }
}
