//! Orchestration of one engine invocation.
//!
//! [`Eye`] ties the pieces together: resolve sources through the resource
//! cache, build arguments, run the session, classify, normalize. Materialized
//! sources are released when the invocation ends, whichever way it ends.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::core::args::build_arguments;
use crate::core::normalize::normalize;
use crate::core::types::{EngineFlag, InvocationRequest, ProcessOutcome, Source};
use crate::error::InvocationError;
use crate::io::config::EngineConfig;
use crate::io::process::{CancelHandle, ProcessSession};
use crate::io::resources::{ResourceCache, TempResourceCache, resolve_sources};

/// Engine front end bound to one session and one resource cache.
pub struct Eye<C: ResourceCache = TempResourceCache> {
    session: ProcessSession,
    cache: C,
    config: EngineConfig,
    default_flags: BTreeSet<EngineFlag>,
}

impl Eye<TempResourceCache> {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let cache = TempResourceCache::new(&config)?;
        Self::with_cache(config, cache)
    }
}

impl<C: ResourceCache> Eye<C> {
    pub fn with_cache(config: EngineConfig, cache: C) -> Result<Self> {
        config.validate().context("engine config")?;
        let default_flags = config.default_flag_set()?;
        let session = ProcessSession::new(&config);
        debug!(engine = %session.engine().display(), "engine front end ready");
        Ok(Self {
            session,
            cache,
            config,
            default_flags,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.session.cancel_handle()
    }

    /// Run `request` and return the classified outcome, normalized on success.
    #[instrument(skip_all, fields(inputs = request.inputs.len(), query = request.query.is_some()))]
    pub fn run(&self, request: &InvocationRequest) -> Result<ProcessOutcome, InvocationError> {
        request.validate()?;
        let mut request = request.clone();
        request.flags.extend(self.default_flags.iter().copied());

        // Held across resolution: a cancel issued while sources are fetched
        // fails this invocation.
        let slot = self.session.acquire()?;
        let (resolved, materialized) =
            resolve_sources(&request, &self.cache, &self.config.accept_types)?;
        let args = build_arguments(&request, &resolved);
        let outcome = self.session.run_in(&slot, &args);
        drop(materialized);
        drop(slot);

        let outcome = outcome?.map_success(|output| normalize(&output));
        info!(success = outcome.is_success(), "invocation finished");
        Ok(outcome)
    }

    /// Run `request` and return the normalized document.
    pub fn execute(&self, request: &InvocationRequest) -> Result<String, InvocationError> {
        self.run(request)?.into_result()
    }

    /// Close the rule set of `files` without a query.
    pub fn pass<P: AsRef<Path>>(
        &self,
        files: &[P],
        flags: &[EngineFlag],
    ) -> Result<String, InvocationError> {
        self.execute(&file_request(files, None, flags))
    }

    /// Answer `query` over `files`.
    pub fn query<P: AsRef<Path>>(
        &self,
        files: &[P],
        query: &Path,
        flags: &[EngineFlag],
    ) -> Result<String, InvocationError> {
        self.execute(&file_request(files, Some(query), flags))
    }

    /// Answer `query` over `files` and write the result to `output`.
    pub fn query_file<P: AsRef<Path>>(
        &self,
        files: &[P],
        query: &Path,
        output: &Path,
        flags: &[EngineFlag],
    ) -> Result<PathBuf, InvocationError> {
        let document = self.query(files, query, flags)?;
        fs::write(output, document).map_err(InvocationError::io(format!(
            "write result {}",
            output.display()
        )))?;
        Ok(output.to_path_buf())
    }

    /// Answer `query` over `files` into a temp file that is deleted when dropped.
    pub fn query_tmp<P: AsRef<Path>>(
        &self,
        files: &[P],
        query: &Path,
        flags: &[EngineFlag],
    ) -> Result<NamedTempFile, InvocationError> {
        let document = self.query(files, query, flags)?;
        let mut file = tempfile::Builder::new()
            .prefix("eyebridge-result-")
            .suffix(".n3")
            .tempfile()
            .map_err(InvocationError::io("create result temp file"))?;
        file.write_all(document.as_bytes())
            .map_err(InvocationError::io("write result temp file"))?;
        Ok(file)
    }
}

fn file_request<P: AsRef<Path>>(
    files: &[P],
    query: Option<&Path>,
    flags: &[EngineFlag],
) -> InvocationRequest {
    let mut request = InvocationRequest::new()
        .inputs(files.iter().map(|file| Source::path(file.as_ref())));
    if let Some(query) = query {
        request = request.query(Source::path(query));
    }
    request.flags.extend(flags.iter().copied());
    request
}
