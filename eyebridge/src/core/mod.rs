//! Deterministic, pure logic for engine invocations.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod args;
pub mod classifier;
pub mod normalize;
pub mod types;
