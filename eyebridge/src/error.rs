//! Typed failures surfaced to callers of an engine invocation.
//!
//! Engine outcomes themselves are values ([`crate::core::types::ProcessOutcome`]);
//! this type covers everything that stops an invocation before or around the
//! engine, plus the `Launch`/`Engine` conversions used by callers that prefer
//! a plain `Result<String, _>`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvocationError {
    /// The request or configuration is unusable (unknown flag, no inputs, malformed source).
    /// Raised before any process is spawned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A second `run` was submitted while the session still owns a running engine.
    #[error("an engine process is already running in this session")]
    SessionBusy,

    /// A source could not be materialized into a local file.
    #[error("failed to materialize {what}: {cause}")]
    Resource { what: String, cause: String },

    /// The engine never started (missing executable, missing startup signature, cancelled).
    #[error("engine failed to launch: {0}")]
    Launch(String),

    /// The engine started and reported a problem with the supplied input.
    #[error("engine reported an error: {0}")]
    Engine(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InvocationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Whether retrying with the same request could succeed once the environment is fixed.
    ///
    /// Launch failures point at setup problems; engine errors point at the input itself.
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Resource { .. } | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_not_environmental() {
        assert!(!InvocationError::Engine("syntax".to_string()).is_environmental());
        assert!(InvocationError::Launch("missing eye".to_string()).is_environmental());
    }

    #[test]
    fn io_helper_keeps_context() {
        let err = InvocationError::io("write output")(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "write output: disk full");
    }
}
