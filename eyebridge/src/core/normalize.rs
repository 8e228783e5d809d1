//! Cleanup of the engine's result document.
//!
//! The document is handled as line-oriented text. Comments and prefix
//! declarations are stripped, namespaces the engine leaves unabbreviated are
//! folded back into prefixed names, and only the prefixes still in use are
//! re-declared on top.
//!
//! Known limitations, kept on purpose:
//! - the `<namespace/local>` rewrite is textual and also applies inside string literals;
//! - a prefix counts as used when its token occurs anywhere in the body, so it can be
//!   re-declared even if it only appears in ordinary text.

use std::sync::LazyLock;

use regex::Regex;

// Line blanks are any whitespace but `\n`, the same set `str::trim` strips.
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[^\S\n]*#[^\n]*(?:\n|\z)").unwrap());

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[^\S\n]*(?:@prefix|PREFIX)[^\S\n]+([\w-]*:)[^\S\n]*<([^>\n]+)>[^\S\n]*\.?[^\S\n]*(?:\n|\z)",
    )
    .unwrap()
});

static FILE_NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^file://.*?([^/]+)$").unwrap());

/// Prefix declarations in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixTable {
    entries: Vec<(String, String)>,
}

impl PrefixTable {
    /// Record a declaration. A redeclared token keeps its first position and takes the new namespace.
    pub fn insert(&mut self, token: &str, namespace: &str) {
        match self.entries.iter_mut().find(|(known, _)| known == token) {
            Some(entry) => entry.1 = namespace.to_string(),
            None => self
                .entries
                .push((token.to_string(), namespace.to_string())),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(known, _)| known == token)
            .map(|(_, namespace)| namespace.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(token, namespace)| (token.as_str(), namespace.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalize a successful result document. Idempotent.
pub fn normalize(raw: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(raw, "");
    let (body, prefixes) = extract_prefixes(&without_comments);
    let mut body = body.trim().to_string();

    // The engine only abbreviates hash namespaces.
    for (token, namespace) in prefixes.iter() {
        if namespace.ends_with('/') {
            body = abbreviate(&body, namespace, token);
        }
    }

    let header: String = prefixes
        .iter()
        .filter(|(token, _)| body.contains(token))
        .map(|(token, namespace)| format!("PREFIX {token} <{namespace}>\n"))
        .collect();

    if header.is_empty() {
        body
    } else {
        format!("{header}\n{body}")
    }
}

/// Remove prefix declaration lines, returning the remaining text and the captured table.
pub fn extract_prefixes(text: &str) -> (String, PrefixTable) {
    let mut table = PrefixTable::default();
    let body = PREFIX_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        table.insert(&caps[1], &shorten_file_namespace(&caps[2]));
        String::new()
    });
    (body.into_owned(), table)
}

/// Engine-local `file://` namespaces collapse to their last path segment.
fn shorten_file_namespace(namespace: &str) -> String {
    FILE_NAMESPACE_RE.replace(namespace, "$1").into_owned()
}

/// Rewrite every `<namespace + local>` reference into `token + local`.
///
/// The local part is one or more ASCII word characters (`[A-Za-z0-9_]`).
fn abbreviate(body: &str, namespace: &str, token: &str) -> String {
    let needle = format!("<{namespace}");
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find(&needle) {
        let after = &rest[start + needle.len()..];
        let local_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if local_len > 0 && after[local_len..].starts_with('>') {
            out.push_str(&rest[..start]);
            out.push_str(token);
            out.push_str(&after[..local_len]);
            rest = &after[local_len + 1..];
        } else {
            out.push_str(&rest[..start + needle.len()]);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
