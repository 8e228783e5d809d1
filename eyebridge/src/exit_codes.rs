//! Stable exit codes for the `eyebridge` CLI.

use crate::error::InvocationError;

/// The engine ran and produced a document.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, or any failure before the engine was spawned.
pub const INVALID: i32 = 1;
/// The engine ran and reported an error about the input.
pub const ENGINE_ERROR: i32 = 2;
/// The engine could not be started (or was cancelled / timed out).
pub const LAUNCH_FAILURE: i32 = 3;

/// Map an invocation failure to its exit code.
pub fn for_error(err: &InvocationError) -> i32 {
    match err {
        InvocationError::Engine(_) => ENGINE_ERROR,
        InvocationError::Launch(_) => LAUNCH_FAILURE,
        _ => INVALID,
    }
}
