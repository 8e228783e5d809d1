//! Materialization of request sources into files the engine can read.
//!
//! The [`ResourceCache`] trait decouples the session from where documents
//! come from. [`TempResourceCache`] keeps everything in a private temp
//! directory; tests can substitute their own implementation.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use crate::core::args::ResolvedSources;
use crate::core::types::{InvocationRequest, Source};
use crate::error::InvocationError;
use crate::io::config::EngineConfig;

/// Loopback hosts are handed to the engine as-is instead of being fetched.
static LOOPBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:localhost|127\.0\.0\.1|\[?[0:]*:1\]?)(?:[:/?#]|$)").unwrap());

/// Store for documents materialized on behalf of one or more invocations.
pub trait ResourceCache {
    /// Fetch `uri` into a local file, sending `accept` as the Accept header.
    fn cache_from_url(&self, uri: &str, accept: &str) -> Result<PathBuf>;

    /// Write `text` into a fresh local file.
    fn cache_from_string(&self, text: &str) -> Result<PathBuf>;

    /// Drop a file previously returned by this cache.
    fn release(&self, path: &Path) -> Result<()>;
}

/// Cache backed by a private temp directory and a blocking HTTP agent.
pub struct TempResourceCache {
    dir: TempDir,
    agent: ureq::Agent,
}

impl TempResourceCache {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("eyebridge-")
            .tempdir()
            .context("create resource cache dir")?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.http_timeout())
            .user_agent(&format!("eyebridge/{}", env!("CARGO_PKG_VERSION")))
            .build();
        debug!(dir = %dir.path().display(), "resource cache created");
        Ok(Self { dir, agent })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    fn new_file(&self, prefix: &str) -> Result<tempfile::NamedTempFile> {
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".n3")
            .tempfile_in(self.dir.path())
            .with_context(|| format!("create cache file in {}", self.dir.path().display()))
    }
}

impl ResourceCache for TempResourceCache {
    #[instrument(skip(self, accept))]
    fn cache_from_url(&self, uri: &str, accept: &str) -> Result<PathBuf> {
        let response = self
            .agent
            .get(uri)
            .set("Accept", accept)
            .call()
            .with_context(|| format!("fetch {uri}"))?;
        let mut file = self.new_file("remote-")?;
        io::copy(&mut response.into_reader(), &mut file)
            .with_context(|| format!("download {uri}"))?;
        let (_, path) = file.keep().context("persist downloaded document")?;
        debug!(path = %path.display(), "cached remote document");
        Ok(path)
    }

    fn cache_from_string(&self, text: &str) -> Result<PathBuf> {
        let mut file = self.new_file("inline-")?;
        file.write_all(text.as_bytes())
            .context("write inline document")?;
        let (_, path) = file.keep().context("persist inline document")?;
        debug!(path = %path.display(), bytes = text.len(), "cached inline document");
        Ok(path)
    }

    fn release(&self, path: &Path) -> Result<()> {
        if !path.starts_with(self.dir.path()) {
            debug!(path = %path.display(), "not owned by cache, leaving in place");
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/// Whether `uri` is an `http(s)` document that must be fetched before the engine can read it.
pub fn is_remote_document(uri: &str) -> bool {
    let rest = match uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    !LOOPBACK_RE.is_match(rest)
}

/// Files materialized for one invocation, released when dropped.
pub struct Materialized<'a, C: ResourceCache + ?Sized> {
    cache: &'a C,
    paths: Vec<PathBuf>,
}

impl<'a, C: ResourceCache + ?Sized> Materialized<'a, C> {
    fn new(cache: &'a C) -> Self {
        Self {
            cache,
            paths: Vec::new(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl<C: ResourceCache + ?Sized> Drop for Materialized<'_, C> {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(e) = self.cache.release(&path) {
                warn!(path = %path.display(), err = %format!("{e:#}"), "failed to release resource");
            }
        }
    }
}

/// Resolve every source of `request` to a location the engine can read.
///
/// Anything materialized here is owned by the returned guard. If resolution
/// fails halfway, what was already materialized is released before returning.
pub fn resolve_sources<'a, C: ResourceCache + ?Sized>(
    request: &InvocationRequest,
    cache: &'a C,
    accept: &str,
) -> Result<(ResolvedSources, Materialized<'a, C>), InvocationError> {
    let mut materialized = Materialized::new(cache);
    let mut resolved = ResolvedSources::default();

    for source in &request.inputs {
        let location = resolve_one(source, cache, accept, &mut materialized)?;
        resolved.inputs.push(location);
    }
    if let Some(query) = &request.query {
        resolved.query = Some(resolve_one(query, cache, accept, &mut materialized)?);
    }

    Ok((resolved, materialized))
}

fn resolve_one<C: ResourceCache + ?Sized>(
    source: &Source,
    cache: &C,
    accept: &str,
    materialized: &mut Materialized<'_, C>,
) -> Result<String, InvocationError> {
    match source {
        Source::Path(path) => path_token(path),
        Source::Inline(text) => {
            let path = cache
                .cache_from_string(text)
                .map_err(|e| InvocationError::Resource {
                    what: "inline document".to_string(),
                    cause: format!("{e:#}"),
                })?;
            materialized.paths.push(path.clone());
            path_token(&path)
        }
        Source::Uri(uri) if is_remote_document(uri) => {
            let path = cache
                .cache_from_url(uri, accept)
                .map_err(|e| InvocationError::Resource {
                    what: uri.clone(),
                    cause: format!("{e:#}"),
                })?;
            materialized.paths.push(path.clone());
            path_token(&path)
        }
        Source::Uri(uri) => Ok(uri.clone()),
    }
}

fn path_token(path: &Path) -> Result<String, InvocationError> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        InvocationError::configuration(format!(
            "malformed source: path {} is not valid UTF-8",
            path.display()
        ))
    })
}
