//! Invocation and normalization layer around the EYE reasoner.
//!
//! The crate keeps the runner's split between pure logic and side effects:
//!
//! - **[`core`]**: argument construction, result classification and document
//!   normalization. No I/O, fully testable in isolation.
//! - **[`io`]**: configuration, source materialization and the engine process
//!   session.
//!
//! [`eye::Eye`] coordinates both to run one invocation end to end.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod eye;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::types::{EngineFlag, InvocationRequest, ProcessOutcome, Source};
pub use crate::error::InvocationError;
pub use crate::eye::Eye;
