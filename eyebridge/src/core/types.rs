//! Shared deterministic types for invoking the engine.
//!
//! These types define stable contracts between the argument builder, the
//! process session and the classifier. They carry no I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::InvocationError;

/// Boolean engine switches.
///
/// Variant order is the order switches are emitted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineFlag {
    Nope,
    NoBranch,
    NoDistinct,
    NoQvars,
    NoQnames,
    Quiet,
    QuickFalse,
    QuickPossible,
    QuickAnswer,
    Think,
    Ances,
    IgnoreSyntaxError,
    Pcl,
    Strings,
    Debug,
    Profile,
    Version,
    Help,
    Pass,
    PassAll,
    Traditional,
}

/// `(flag, camelCase name, command-line switch)`.
const FLAG_TABLE: [(EngineFlag, &str, &str); 21] = [
    (EngineFlag::Nope, "nope", "--nope"),
    (EngineFlag::NoBranch, "noBranch", "--no-branch"),
    (EngineFlag::NoDistinct, "noDistinct", "--no-distinct"),
    (EngineFlag::NoQvars, "noQvars", "--no-qvars"),
    (EngineFlag::NoQnames, "noQnames", "--no-qnames"),
    (EngineFlag::Quiet, "quiet", "--quiet"),
    (EngineFlag::QuickFalse, "quickFalse", "--quick-false"),
    (EngineFlag::QuickPossible, "quickPossible", "--quick-possible"),
    (EngineFlag::QuickAnswer, "quickAnswer", "--quick-answer"),
    (EngineFlag::Think, "think", "--think"),
    (EngineFlag::Ances, "ances", "--ances"),
    (EngineFlag::IgnoreSyntaxError, "ignoreSyntaxError", "--ignore-syntax-error"),
    (EngineFlag::Pcl, "pcl", "--pcl"),
    (EngineFlag::Strings, "strings", "--strings"),
    (EngineFlag::Debug, "debug", "--debug"),
    (EngineFlag::Profile, "profile", "--profile"),
    (EngineFlag::Version, "version", "--version"),
    (EngineFlag::Help, "help", "--help"),
    (EngineFlag::Pass, "pass", "--pass"),
    (EngineFlag::PassAll, "passAll", "--pass-all"),
    (EngineFlag::Traditional, "traditional", "--traditional"),
];

impl EngineFlag {
    /// Every flag in emission order.
    pub fn all() -> impl Iterator<Item = EngineFlag> {
        FLAG_TABLE.iter().map(|(flag, _, _)| *flag)
    }

    /// The camelCase name callers use to request this flag.
    pub fn name(self) -> &'static str {
        FLAG_TABLE[self as usize].1
    }

    /// The `--kebab-case` switch passed to the engine.
    pub fn switch(self) -> &'static str {
        FLAG_TABLE[self as usize].2
    }
}

impl FromStr for EngineFlag {
    type Err = InvocationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        FLAG_TABLE
            .iter()
            .find(|(_, known, _)| *known == name)
            .map(|(flag, _, _)| *flag)
            .ok_or_else(|| InvocationError::configuration(format!("unrecognized flag `{name}`")))
    }
}

impl fmt::Display for EngineFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a list of camelCase flag names, rejecting unknown ones.
pub fn parse_flags<I, S>(names: I) -> Result<BTreeSet<EngineFlag>, InvocationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().parse())
        .collect()
}

/// Where an input or query document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A caller-owned file. Never deleted by this crate.
    Path(PathBuf),
    /// Document text that must be written to a file before the engine can read it.
    Inline(String),
    /// A URI. Remote `http(s)` documents are fetched into the resource cache;
    /// anything else is handed to the engine verbatim.
    Uri(String),
}

impl Source {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn inline(text: impl Into<String>) -> Self {
        Self::Inline(text.into())
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    /// Interpret a command-line argument: `http(s)://` URIs become [`Source::Uri`],
    /// everything else is a path.
    pub fn from_arg(arg: &str) -> Self {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            Self::Uri(arg.to_string())
        } else {
            Self::Path(PathBuf::from(arg))
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Path(path) => format!("path {}", path.display()),
            Self::Inline(text) => format!("inline document ({} bytes)", text.len()),
            Self::Uri(uri) => format!("uri {uri}"),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), InvocationError> {
        let empty = match self {
            Self::Path(path) => path.as_os_str().is_empty(),
            Self::Inline(_) => false,
            Self::Uri(uri) => uri.trim().is_empty(),
        };
        if empty {
            return Err(InvocationError::configuration(format!(
                "malformed source: empty {}",
                self.describe()
            )));
        }
        Ok(())
    }
}

/// A structured engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Input documents, passed to the engine in this order.
    pub inputs: Vec<Source>,
    /// Optional query document.
    pub query: Option<Source>,
    /// Enabled switches.
    pub flags: BTreeSet<EngineFlag>,
    /// Explicit pass-only policy. `None` means pass-only whenever no query is given.
    pub pass_only: Option<bool>,
}

impl InvocationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, source: Source) -> Self {
        self.inputs.push(source);
        self
    }

    pub fn inputs<I: IntoIterator<Item = Source>>(mut self, sources: I) -> Self {
        self.inputs.extend(sources);
        self
    }

    pub fn query(mut self, source: Source) -> Self {
        self.query = Some(source);
        self
    }

    pub fn flag(mut self, flag: EngineFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Enable flags by camelCase name. Unknown names fail here, before any process is spawned.
    pub fn flag_names<I, S>(mut self, names: I) -> Result<Self, InvocationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.flags.extend(parse_flags(names)?);
        Ok(self)
    }

    pub fn pass_only(mut self, enabled: bool) -> Self {
        self.pass_only = Some(enabled);
        self
    }

    /// Whether the engine should only close the rule set instead of answering a query.
    pub fn is_pass_only(&self) -> bool {
        match self.pass_only {
            Some(explicit) => explicit,
            None => self.query.is_none(),
        }
    }

    pub fn validate(&self) -> Result<(), InvocationError> {
        if self.inputs.is_empty() {
            return Err(InvocationError::configuration(
                "at least one input source is required",
            ));
        }
        for source in self.inputs.iter().chain(self.query.iter()) {
            source.validate()?;
        }
        Ok(())
    }
}

/// Classified result of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "text", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The engine ran and reported no error; carries the result document.
    Success(String),
    /// The engine ran and reported `** ERROR **`; carries only the extracted message.
    EngineError(String),
    /// The engine never ran; carries the verbatim diagnostic text or spawn error.
    LaunchFailure(String),
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Transform the success payload, leaving failures untouched.
    pub fn map_success<F: FnOnce(String) -> String>(self, f: F) -> Self {
        match self {
            Self::Success(output) => Self::Success(f(output)),
            other => other,
        }
    }

    pub fn into_result(self) -> Result<String, InvocationError> {
        match self {
            Self::Success(output) => Ok(output),
            Self::EngineError(message) => Err(InvocationError::Engine(message)),
            Self::LaunchFailure(cause) => Err(InvocationError::Launch(cause)),
        }
    }
}
