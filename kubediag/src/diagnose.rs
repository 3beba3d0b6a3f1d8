//! The propose → execute → observe diagnosis loop.
//!
//! Each cycle makes one backend call and acts on the reply:
//!
//! - **Report**: the reply is the findings table; the session is done.
//! - **Command**: a fresh command is executed and its result fed back as a
//!   user message; a command already run in this session is not executed
//!   again, the backend gets a notice instead.
//! - **Stall**: the backend proposed nothing actionable; the session ends
//!   incomplete.
//!
//! Executor failures never end a session, they become transcript content.
//! Backend failures are retried until `max_backend_failures` consecutive
//! failures. Cycle count, wall clock, repeated proposals and cancellation are
//! all bounded, and every exit path returns the commands executed so far.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::core::budget::{command_timeout, remaining_budget};
use crate::core::classifier::{ClassifyPolicy, classify};
use crate::core::feedback::{command_feedback, duplicate_feedback};
use crate::core::transcript::Transcript;
use crate::core::types::{AbortReason, IssuedCommand, Outcome, Proposal, SessionOutcome};
use crate::io::backend::{BackendError, ReasoningBackend};
use crate::io::config::DiagnoserConfig;
use crate::io::executor::CommandExecutor;
use crate::io::prompt::SessionPrompts;

/// Limits and policies for one session.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_cycles: u32,
    pub max_backend_failures: u32,
    pub backend_retry_delay: Duration,
    pub max_repeated_proposals: u32,
    pub session_timeout: Duration,
    pub command_timeout: Duration,
    pub classify: ClassifyPolicy,
}

impl LoopConfig {
    pub fn from_config(cfg: &DiagnoserConfig) -> Self {
        Self {
            max_cycles: cfg.max_cycles,
            max_backend_failures: cfg.max_backend_failures,
            backend_retry_delay: cfg.backend_retry_delay(),
            max_repeated_proposals: cfg.max_repeated_proposals,
            session_timeout: cfg.session_timeout(),
            command_timeout: cfg.command_timeout(),
            classify: ClassifyPolicy::new(cfg.command_prefix.clone()),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&DiagnoserConfig::default())
    }
}

/// Progress notifications emitted while the loop runs.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// A command was executed and recorded.
    Executed {
        cycle: u32,
        command: &'a IssuedCommand,
    },
    /// A previously executed command was proposed again and skipped.
    Duplicate { cycle: u32, command: &'a str },
    /// A backend call failed.
    BackendFailed {
        cycle: u32,
        consecutive: u32,
        error: &'a BackendError,
    },
    /// The backend produced the final report.
    Reported { cycle: u32 },
}

/// Mutable state of one session, owned by a single `run_diagnosis` call.
#[derive(Debug)]
pub struct SessionState {
    pub transcript: Transcript,
    pub issued: Vec<IssuedCommand>,
    /// Backend calls made so far.
    pub cycles: u32,
    pub consecutive_backend_failures: u32,
    pub consecutive_repeats: u32,
}

impl SessionState {
    pub fn new(prompts: &SessionPrompts) -> Self {
        let mut transcript = Transcript::new(prompts.system.clone());
        transcript.push_user(prompts.initial.clone());
        Self {
            transcript,
            issued: Vec::new(),
            cycles: 0,
            consecutive_backend_failures: 0,
            consecutive_repeats: 0,
        }
    }

    pub fn has_issued(&self, command: &str) -> bool {
        self.issued.iter().any(|issued| issued.text == command)
    }

    fn finish(self, outcome: Outcome, report: Option<String>) -> SessionOutcome {
        SessionOutcome {
            outcome,
            report,
            issued_commands: self.issued,
            transcript: self.transcript,
            cycles: self.cycles,
        }
    }
}

/// What a single cycle decided.
enum Step {
    Continue,
    Report(String),
    Abort(AbortReason),
}

/// Run one diagnosis session to completion.
///
/// Never fails: every terminal condition is reported through the returned
/// [`SessionOutcome`], which always carries the commands executed so far.
pub fn run_diagnosis<B, E, F>(
    backend: &B,
    executor: &E,
    prompts: &SessionPrompts,
    config: &LoopConfig,
    cancel: &CancelToken,
    mut on_event: F,
) -> SessionOutcome
where
    B: ReasoningBackend,
    E: CommandExecutor,
    F: FnMut(&LoopEvent<'_>),
{
    let deadline = Instant::now() + config.session_timeout;
    let mut state = SessionState::new(prompts);
    info!(
        max_cycles = config.max_cycles,
        prefix = %config.classify.command_prefix,
        "starting diagnosis session"
    );

    loop {
        if cancel.is_cancelled() {
            return abort(state, AbortReason::Cancelled);
        }
        if state.cycles >= config.max_cycles {
            return abort(
                state,
                AbortReason::CycleBudgetExhausted {
                    max_cycles: config.max_cycles,
                },
            );
        }
        if remaining_budget(deadline).is_none() {
            return abort(state, AbortReason::SessionTimedOut);
        }

        match run_cycle(
            backend,
            executor,
            config,
            cancel,
            deadline,
            &mut state,
            &mut on_event,
        ) {
            Step::Continue => {}
            Step::Report(report) => {
                info!(
                    cycles = state.cycles,
                    commands = state.issued.len(),
                    "diagnosis complete"
                );
                return state.finish(Outcome::Done, Some(report));
            }
            Step::Abort(reason) => return abort(state, reason),
        }
    }
}

fn run_cycle<B, E, F>(
    backend: &B,
    executor: &E,
    config: &LoopConfig,
    cancel: &CancelToken,
    deadline: Instant,
    state: &mut SessionState,
    on_event: &mut F,
) -> Step
where
    B: ReasoningBackend,
    E: CommandExecutor,
    F: FnMut(&LoopEvent<'_>),
{
    state.cycles += 1;
    let cycle = state.cycles;
    debug!(
        cycle,
        messages = state.transcript.messages().len(),
        "requesting proposal"
    );

    let reply = match backend.advance(state.transcript.messages()) {
        Ok(reply) => {
            state.consecutive_backend_failures = 0;
            reply
        }
        Err(error) => {
            state.consecutive_backend_failures += 1;
            let consecutive = state.consecutive_backend_failures;
            warn!(cycle, consecutive, %error, "backend call failed");
            on_event(&LoopEvent::BackendFailed {
                cycle,
                consecutive,
                error: &error,
            });
            if consecutive >= config.max_backend_failures {
                return Step::Abort(AbortReason::BackendFailures {
                    consecutive,
                    last_error: error.to_string(),
                });
            }
            let delay = retry_delay(config.backend_retry_delay, consecutive);
            let delay = remaining_budget(deadline).map_or(Duration::ZERO, |left| left.min(delay));
            if !delay.is_zero() && !cancel.sleep(delay) {
                return Step::Abort(AbortReason::Cancelled);
            }
            return Step::Continue;
        }
    };

    let proposal = classify(&reply, &config.classify);
    state.transcript.push_assistant(reply.clone());

    match proposal {
        Proposal::Report => {
            on_event(&LoopEvent::Reported { cycle });
            Step::Report(reply)
        }
        Proposal::Stall => {
            info!(cycle, "backend proposed no command and no report");
            Step::Abort(AbortReason::NoActionableOutput)
        }
        Proposal::Command(command) if state.has_issued(&command) => {
            state.consecutive_repeats += 1;
            let consecutive = state.consecutive_repeats;
            warn!(cycle, consecutive, command = %command, "command already executed, skipping");
            state.transcript.push_user(duplicate_feedback(&command));
            on_event(&LoopEvent::Duplicate {
                cycle,
                command: &command,
            });
            if consecutive >= config.max_repeated_proposals {
                return Step::Abort(AbortReason::RepeatedProposal { consecutive });
            }
            Step::Continue
        }
        Proposal::Command(command) => {
            state.consecutive_repeats = 0;
            if cancel.is_cancelled() {
                return Step::Abort(AbortReason::Cancelled);
            }
            let Some(timeout) = command_timeout(deadline, config.command_timeout) else {
                return Step::Abort(AbortReason::SessionTimedOut);
            };

            let result = executor.execute(&command, timeout);
            info!(cycle, command = %command, succeeded = result.succeeded, "command executed");
            state
                .transcript
                .push_user(command_feedback(&command, &result));
            state.issued.push(IssuedCommand::new(command, result));
            if let Some(issued) = state.issued.last() {
                on_event(&LoopEvent::Executed {
                    cycle,
                    command: issued,
                });
            }
            Step::Continue
        }
    }
}

fn abort(state: SessionState, reason: AbortReason) -> SessionOutcome {
    warn!(
        cycles = state.cycles,
        commands = state.issued.len(),
        reason = %reason,
        "diagnosis aborted"
    );
    state.finish(Outcome::Aborted(reason), None)
}

/// Exponential backoff: `base * 2^(consecutive - 1)`, capped at 60 seconds.
fn retry_delay(base: Duration, consecutive: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(consecutive.saturating_sub(1));
    base.saturating_mul(multiplier).min(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CommandResult, Role};
    use crate::io::backend::BackendErrorKind;
    use crate::test_support::{
        REPORT_REPLY, ScriptedBackend, ScriptedExecutor, fast_loop_config, test_prompts,
    };

    fn run(backend: &ScriptedBackend, executor: &ScriptedExecutor) -> SessionOutcome {
        run_diagnosis(
            backend,
            executor,
            &test_prompts(),
            &fast_loop_config(),
            &CancelToken::new(),
            |_| {},
        )
    }

    #[test]
    fn report_on_first_message_finishes_in_one_cycle() {
        let backend = ScriptedBackend::replies(&[REPORT_REPLY]);
        let executor = ScriptedExecutor::new(Vec::new());

        let outcome = run(&backend, &executor);

        assert_eq!(outcome.outcome, Outcome::Done);
        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.report.as_deref(), Some(REPORT_REPLY));
        assert!(outcome.issued_commands.is_empty());
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn executed_result_is_fed_back_verbatim() {
        let backend = ScriptedBackend::replies(&["kubectl get pods --all-namespaces", REPORT_REPLY]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("pod-a Running")]);

        let outcome = run(&backend, &executor);

        assert!(outcome.is_done());
        assert_eq!(outcome.issued_commands.len(), 1);
        assert!(outcome.issued_commands[0].succeeded);
        let messages = outcome.transcript.messages();
        let feedback = &messages[3];
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("pod-a Running"));
        assert!(feedback.content.starts_with("[success]"));

        // The backend saw the feedback before producing the report.
        let second_call = backend.transcript_at(1);
        assert_eq!(
            second_call.last().map(|m| m.content.as_str()),
            Some(feedback.content.as_str())
        );
    }

    #[test]
    fn duplicate_proposal_is_not_executed() {
        let backend = ScriptedBackend::replies(&[
            "kubectl get nodes",
            "kubectl get nodes",
            REPORT_REPLY,
        ]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("node-1 Ready")]);

        let outcome = run(&backend, &executor);

        assert!(outcome.is_done());
        assert_eq!(executor.calls(), 1);
        assert_eq!(outcome.issued_commands.len(), 1);
        let notice = &outcome.transcript.messages()[5];
        assert_eq!(notice.role, Role::User);
        assert!(notice.content.starts_with("[already executed]"));
    }

    #[test]
    fn executor_failure_keeps_session_going() {
        let backend = ScriptedBackend::replies(&["kubectl logs web-0", REPORT_REPLY]);
        let executor = ScriptedExecutor::new(vec![CommandResult::failure(
            "Error from server (NotFound): pods \"web-0\" not found",
        )]);

        let outcome = run(&backend, &executor);

        assert!(outcome.is_done());
        assert!(!outcome.issued_commands[0].succeeded);
        let feedback = &outcome.transcript.messages()[3];
        assert!(feedback.content.starts_with("[failure]"));
        assert!(feedback.content.contains("pods \"web-0\" not found"));
    }

    #[test]
    fn stall_aborts_without_report() {
        let backend = ScriptedBackend::replies(&["The cluster seems fine to me."]);
        let executor = ScriptedExecutor::new(Vec::new());

        let outcome = run(&backend, &executor);

        assert_eq!(
            outcome.outcome,
            Outcome::Aborted(AbortReason::NoActionableOutput)
        );
        assert!(outcome.report.is_none());
        assert_eq!(outcome.cycles, 1);
    }

    #[test]
    fn backend_failures_abort_after_cap() {
        let backend = ScriptedBackend::always_failing(BackendErrorKind::Server);
        let executor = ScriptedExecutor::new(Vec::new());

        let outcome = run(&backend, &executor);

        assert_eq!(backend.calls(), 3);
        match outcome.outcome {
            Outcome::Aborted(AbortReason::BackendFailures { consecutive, .. }) => {
                assert_eq!(consecutive, 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn successful_call_resets_failure_count() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::network("reset")),
            Err(BackendError::network("reset")),
            Ok("kubectl get pods".to_string()),
            Err(BackendError::network("reset")),
            Err(BackendError::network("reset")),
            Ok(REPORT_REPLY.to_string()),
        ]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("ok")]);

        let outcome = run(&backend, &executor);

        assert!(outcome.is_done());
        assert_eq!(outcome.cycles, 6);
    }

    #[test]
    fn repeated_proposals_are_capped() {
        let backend = ScriptedBackend::replies(&[
            "kubectl get pods",
            "kubectl get pods",
            "kubectl get pods",
            "kubectl get pods",
        ]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("pod-a Running")]);

        let outcome = run(&backend, &executor);

        assert_eq!(
            outcome.outcome,
            Outcome::Aborted(AbortReason::RepeatedProposal { consecutive: 3 })
        );
        assert_eq!(executor.calls(), 1);
        assert_eq!(outcome.issued_commands.len(), 1);
    }

    #[test]
    fn cycle_budget_bounds_the_session() {
        let backend = ScriptedBackend::replies(&[
            "kubectl get pods",
            "kubectl get nodes",
            "kubectl get events",
        ]);
        let executor = ScriptedExecutor::new(vec![
            CommandResult::success("a"),
            CommandResult::success("b"),
        ]);
        let config = LoopConfig {
            max_cycles: 2,
            ..fast_loop_config()
        };

        let outcome = run_diagnosis(
            &backend,
            &executor,
            &test_prompts(),
            &config,
            &CancelToken::new(),
            |_| {},
        );

        assert_eq!(
            outcome.outcome,
            Outcome::Aborted(AbortReason::CycleBudgetExhausted { max_cycles: 2 })
        );
        assert_eq!(outcome.issued_commands.len(), 2);
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn session_deadline_during_execution_keeps_the_command() {
        let backend = ScriptedBackend::replies(&["kubectl get pods", "kubectl get nodes"]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("pod-a Running")])
            .with_delay(Duration::from_millis(50));
        let config = LoopConfig {
            session_timeout: Duration::from_millis(20),
            ..fast_loop_config()
        };

        let outcome = run_diagnosis(
            &backend,
            &executor,
            &test_prompts(),
            &config,
            &CancelToken::new(),
            |_| {},
        );

        assert_eq!(outcome.outcome, Outcome::Aborted(AbortReason::SessionTimedOut));
        assert_eq!(backend.calls(), 1);
        assert_eq!(outcome.issued_commands.len(), 1);
        assert_eq!(outcome.issued_commands[0].stdout, "pod-a Running");
        assert!(outcome.report.is_none());
    }

    #[test]
    fn session_deadline_during_backend_call_skips_execution() {
        let backend =
            ScriptedBackend::replies(&["kubectl get pods"]).with_delay(Duration::from_millis(50));
        let executor = ScriptedExecutor::new(Vec::new());
        let config = LoopConfig {
            session_timeout: Duration::from_millis(20),
            ..fast_loop_config()
        };

        let outcome = run_diagnosis(
            &backend,
            &executor,
            &test_prompts(),
            &config,
            &CancelToken::new(),
            |_| {},
        );

        assert_eq!(outcome.outcome, Outcome::Aborted(AbortReason::SessionTimedOut));
        assert_eq!(executor.calls(), 0);
        assert!(outcome.issued_commands.is_empty());
        assert_eq!(outcome.cycles, 1);
    }

    #[test]
    fn cancellation_keeps_executed_commands() {
        let backend = ScriptedBackend::replies(&["kubectl get pods", "kubectl get nodes"]);
        let executor = ScriptedExecutor::new(vec![
            CommandResult::success("pod-a Running"),
            CommandResult::success("node-1 Ready"),
        ]);
        let cancel = CancelToken::new();

        let outcome = run_diagnosis(
            &backend,
            &executor,
            &test_prompts(),
            &fast_loop_config(),
            &cancel,
            |event| {
                if matches!(event, LoopEvent::Executed { .. }) {
                    cancel.cancel();
                }
            },
        );

        assert_eq!(outcome.outcome, Outcome::Aborted(AbortReason::Cancelled));
        assert_eq!(outcome.issued_commands.len(), 1);
        assert_eq!(outcome.issued_commands[0].stdout, "pod-a Running");
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn events_are_reported_in_order() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::network("flaky")),
            Ok("kubectl get pods".to_string()),
            Ok("kubectl get pods".to_string()),
            Ok(REPORT_REPLY.to_string()),
        ]);
        let executor = ScriptedExecutor::new(vec![CommandResult::success("ok")]);
        let mut seen = Vec::new();

        run_diagnosis(
            &backend,
            &executor,
            &test_prompts(),
            &fast_loop_config(),
            &CancelToken::new(),
            |event| {
                seen.push(match event {
                    LoopEvent::BackendFailed { .. } => "failed",
                    LoopEvent::Executed { .. } => "executed",
                    LoopEvent::Duplicate { .. } => "duplicate",
                    LoopEvent::Reported { .. } => "reported",
                });
            },
        );

        assert_eq!(seen, vec!["failed", "executed", "duplicate", "reported"]);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(4));
        assert_eq!(retry_delay(base, 3), Duration::from_secs(8));
        assert_eq!(retry_delay(base, 10), Duration::from_secs(60));
        assert_eq!(retry_delay(Duration::ZERO, 5), Duration::ZERO);
    }
}
