//! Test-only scripted collaborators for driving the diagnosis loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use crate::core::classifier::ClassifyPolicy;
use crate::core::types::{CommandResult, Message};
use crate::diagnose::LoopConfig;
use crate::io::backend::{BackendError, BackendErrorKind, ReasoningBackend};
use crate::io::executor::CommandExecutor;
use crate::io::prompt::SessionPrompts;

/// A findings table the classifier accepts as the final report.
pub const REPORT_REPLY: &str = "Final synthesis:\n\
| Pod Name | Namespace | Status | Cause Identified | Solution Proposed |\n\
|----------|-----------|--------|------------------|-------------------|\n\
| web-0 | shop | CrashLoopBackOff | Missing ConfigMap | Create the shop-config ConfigMap |";

/// Prompts with fixed, short content.
pub fn test_prompts() -> SessionPrompts {
    SessionPrompts {
        system: "diagnose the cluster".to_string(),
        initial: "propose a kubectl command".to_string(),
    }
}

/// Loop limits with no retry delay so failure paths run instantly.
pub fn fast_loop_config() -> LoopConfig {
    LoopConfig {
        max_cycles: 20,
        max_backend_failures: 3,
        backend_retry_delay: Duration::ZERO,
        max_repeated_proposals: 3,
        session_timeout: Duration::from_secs(60),
        command_timeout: Duration::from_secs(5),
        classify: ClassifyPolicy::default(),
    }
}

/// Backend that replays a queue of replies and records every transcript it saw.
///
/// Once the queue is empty it either fails with `fallback` or panics.
pub struct ScriptedBackend {
    script: RefCell<VecDeque<Result<String, BackendError>>>,
    fallback: Option<BackendErrorKind>,
    delay: Duration,
    transcripts: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            fallback: None,
            delay: Duration::ZERO,
            transcripts: RefCell::new(Vec::new()),
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|reply| Ok(reply.to_string())).collect())
    }

    pub fn always_failing(kind: BackendErrorKind) -> Self {
        Self::new(Vec::new()).then_failing(kind)
    }

    /// Fail with `kind` on every call after the script runs out.
    pub fn then_failing(mut self, kind: BackendErrorKind) -> Self {
        self.fallback = Some(kind);
        self
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.transcripts.borrow().len()
    }

    /// Transcript passed to the `index`-th call (0-based).
    pub fn transcript_at(&self, index: usize) -> Vec<Message> {
        self.transcripts.borrow()[index].clone()
    }
}

impl ReasoningBackend for ScriptedBackend {
    fn advance(&self, transcript: &[Message]) -> Result<String, BackendError> {
        self.transcripts.borrow_mut().push(transcript.to_vec());
        thread::sleep(self.delay);
        match self.script.borrow_mut().pop_front() {
            Some(reply) => reply,
            None => match self.fallback {
                Some(kind) => Err(BackendError::new(kind, "scripted failure")),
                None => panic!("scripted backend exhausted"),
            },
        }
    }
}

/// Executor that replays a queue of results and records the commands it ran.
pub struct ScriptedExecutor {
    results: RefCell<VecDeque<CommandResult>>,
    commands: RefCell<Vec<String>>,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<CommandResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            commands: RefCell::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` before returning each result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.commands.borrow().len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, command: &str, _timeout: Duration) -> CommandResult {
        self.commands.borrow_mut().push(command.to_string());
        thread::sleep(self.delay);
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted executor exhausted at `{command}`"))
    }
}
