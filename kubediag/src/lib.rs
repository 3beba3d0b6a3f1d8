//! Autonomous Kubernetes diagnosis loop.
//!
//! A reasoning backend proposes one read-only inspection command at a time,
//! the command is executed, and its result is fed back until the backend
//! answers with a findings table. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, transcript,
//!   feedback text, budgets). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (process execution, the HTTP
//!   backend, config files, prompt templates), each behind a trait or a
//!   plain function so tests can substitute them.
//!
//! [`diagnose`] composes both into the session loop.
//!
//! The read-only restriction on proposed commands is a prompt-level policy
//! agreed with the backend. Commands are tokenized and run as proposed;
//! nothing here sandboxes them.

pub mod cancel;
pub mod core;
pub mod diagnose;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
