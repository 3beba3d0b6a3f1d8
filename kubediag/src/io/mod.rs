//! Side-effecting collaborators of the diagnosis loop.

pub mod backend;
pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
