//! Pure construction of the engine's command line.
//!
//! The engine is sensitive to token order: `[flags...] [inputs...] [--query <path>] [--nope]`.

use std::fmt;

use crate::core::types::{EngineFlag, InvocationRequest};

/// Local locations for a request's sources, in request order.
///
/// Produced by the resource layer; the builder never touches the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSources {
    pub inputs: Vec<String>,
    pub query: Option<String>,
}

/// Immutable, ordered engine argument tokens (binary name excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineArguments(Vec<String>);

impl EngineArguments {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EngineArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Build the argument list for `request` whose sources resolved to `resolved`.
pub fn build_arguments(request: &InvocationRequest, resolved: &ResolvedSources) -> EngineArguments {
    let mut tokens: Vec<String> = request
        .flags
        .iter()
        .map(|flag| flag.switch().to_string())
        .collect();

    tokens.extend(resolved.inputs.iter().cloned());

    if let Some(query) = &resolved.query {
        tokens.push("--query".to_string());
        tokens.push(query.clone());
    }

    if request.is_pass_only() && !request.flags.contains(&EngineFlag::Nope) {
        tokens.push(EngineFlag::Nope.switch().to_string());
    }

    EngineArguments(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Source;

    fn resolved(inputs: &[&str], query: Option<&str>) -> ResolvedSources {
        ResolvedSources {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            query: query.map(str::to_string),
        }
    }

    #[test]
    fn flags_then_inputs_then_query() {
        let request = InvocationRequest::new()
            .inputs([Source::path("a.n3"), Source::path("b.n3")])
            .query(Source::path("q.n3"))
            .flag(EngineFlag::Quiet)
            .flag(EngineFlag::IgnoreSyntaxError);
        let args = build_arguments(&request, &resolved(&["a.n3", "b.n3"], Some("q.n3")));
        assert_eq!(
            args.as_slice(),
            [
                "--quiet",
                "--ignore-syntax-error",
                "a.n3",
                "b.n3",
                "--query",
                "q.n3"
            ]
        );
    }

    #[test]
    fn no_query_defaults_to_pass_only() {
        let request = InvocationRequest::new().input(Source::path("a.n3"));
        let args = build_arguments(&request, &resolved(&["a.n3"], None));
        assert_eq!(args.as_slice(), ["a.n3", "--nope"]);
    }

    #[test]
    fn pass_only_disabled_omits_nope() {
        let request = InvocationRequest::new()
            .input(Source::path("a.n3"))
            .pass_only(false);
        let args = build_arguments(&request, &resolved(&["a.n3"], None));
        assert_eq!(args.as_slice(), ["a.n3"]);
    }

    #[test]
    fn explicit_pass_only_with_query_appends_nope_last() {
        let request = InvocationRequest::new()
            .input(Source::path("a.n3"))
            .query(Source::path("q.n3"))
            .pass_only(true);
        let args = build_arguments(&request, &resolved(&["a.n3"], Some("q.n3")));
        assert_eq!(args.as_slice(), ["a.n3", "--query", "q.n3", "--nope"]);
    }

    #[test]
    fn nope_flag_is_not_duplicated() {
        let request = InvocationRequest::new()
            .input(Source::path("a.n3"))
            .flag(EngineFlag::Nope);
        let args = build_arguments(&request, &resolved(&["a.n3"], None));
        assert_eq!(args.as_slice(), ["--nope", "a.n3"]);
    }

    #[test]
    fn flag_order_ignores_caller_order() {
        let forward = InvocationRequest::new()
            .input(Source::path("a.n3"))
            .flag_names(["traditional", "quiet", "think"])
            .expect("flags");
        let reversed = InvocationRequest::new()
            .input(Source::path("a.n3"))
            .flag_names(["think", "quiet", "traditional"])
            .expect("flags");
        let inputs = resolved(&["a.n3"], None);
        let first = build_arguments(&forward, &inputs);
        assert_eq!(first, build_arguments(&reversed, &inputs));
        assert_eq!(first, build_arguments(&forward, &inputs));
        assert_eq!(
            first.as_slice(),
            ["--quiet", "--think", "--traditional", "a.n3", "--nope"]
        );
    }

    #[test]
    fn display_joins_tokens() {
        let request = InvocationRequest::new().input(Source::path("a.n3"));
        let args = build_arguments(&request, &resolved(&["a.n3"], None));
        assert_eq!(args.to_string(), "a.n3 --nope");
        assert_eq!(args.len(), 2);
    }
}
