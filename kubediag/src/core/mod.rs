//! Deterministic, pure logic shared by the diagnosis loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod feedback;
pub mod transcript;
pub mod types;
