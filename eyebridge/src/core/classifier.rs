//! Deterministic classification of a finished engine run.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::ProcessOutcome;

/// Emitted on stderr whenever the engine genuinely starts, independent of locale.
static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:Id: euler\.yap|EYE)").unwrap());

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\*\* ERROR \*\*\s*(.*)$").unwrap());

/// Classify captured streams into a [`ProcessOutcome`].
///
/// - No startup signature on stderr: `LaunchFailure` with the verbatim diagnostic text,
///   whatever stdout contains.
/// - Signature plus an `** ERROR **` line: `EngineError` with only the message.
/// - Otherwise: `Success` with stdout.
pub fn classify(diagnostic: &str, result: &str) -> ProcessOutcome {
    if !SIGNATURE_RE.is_match(diagnostic) {
        return ProcessOutcome::LaunchFailure(diagnostic.to_string());
    }
    if let Some(caps) = ERROR_RE.captures(diagnostic) {
        let message = caps.get(1).map_or("", |m| m.as_str()).trim();
        return ProcessOutcome::EngineError(message.to_string());
    }
    ProcessOutcome::Success(result.to_string())
}
