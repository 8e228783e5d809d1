//! Engine configuration, usually stored as `eyebridge.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{EngineFlag, parse_flags};

/// Accept header sent when fetching remote documents.
pub const DEFAULT_ACCEPT_TYPES: &str = "text/n3,text/turtle,*/*;q=.1";

/// Engine configuration (TOML).
///
/// Missing fields default to values suitable for a locally installed `eye`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable. Defaults to `eye` (`eye.cmd` on Windows).
    pub engine_path: Option<String>,

    /// Tokens placed before the generated arguments, e.g. `["-x", "eye.pvm", "--"]`
    /// when `engine_path` points at `swipl`.
    pub engine_args: Vec<String>,

    /// Wall-clock budget for one engine run.
    pub timeout_secs: u64,

    /// How often the session checks for exit, cancellation and timeout.
    pub poll_interval_ms: u64,

    /// How long output is still read after the engine exits. Bounds the wait
    /// when a descendant of the engine keeps its pipes open.
    pub drain_grace_ms: u64,

    /// Accept header for remote documents.
    pub accept_types: String,

    /// Timeout for fetching one remote document.
    pub http_timeout_secs: u64,

    /// camelCase flag names enabled on every request.
    pub default_flags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_path: None,
            engine_args: Vec::new(),
            timeout_secs: 10 * 60,
            poll_interval_ms: 50,
            drain_grace_ms: 500,
            accept_types: DEFAULT_ACCEPT_TYPES.to_string(),
            http_timeout_secs: 30,
            default_flags: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow!("http_timeout_secs must be > 0"));
        }
        if let Some(path) = &self.engine_path
            && path.trim().is_empty()
        {
            return Err(anyhow!("engine_path must not be empty"));
        }
        parse_flags(&self.default_flags).context("default_flags")?;
        Ok(())
    }

    /// The executable to spawn.
    pub fn engine_binary(&self) -> PathBuf {
        match &self.engine_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(default_engine_binary()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn default_flag_set(&self) -> Result<BTreeSet<EngineFlag>> {
        parse_flags(&self.default_flags).context("default_flags")
    }
}

/// Platform-specific engine executable name.
pub fn default_engine_binary() -> &'static str {
    if cfg!(windows) { "eye.cmd" } else { "eye" }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("eyebridge.toml");
        let cfg = EngineConfig {
            engine_path: Some("swipl".to_string()),
            engine_args: vec!["-x".to_string(), "eye.pvm".to_string(), "--".to_string()],
            default_flags: vec!["quiet".to_string()],
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("eyebridge.toml");
        fs::write(&path, "timeout_secs = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.accept_types, DEFAULT_ACCEPT_TYPES);
        assert_eq!(cfg.drain_grace(), Duration::from_millis(500));
    }

    #[test]
    fn unknown_default_flag_is_rejected() {
        let cfg = EngineConfig {
            default_flags: vec!["noSuchFlag".to_string()],
            ..EngineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("noSuchFlag"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = EngineConfig {
            timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn engine_binary_prefers_override() {
        assert_eq!(
            EngineConfig::default().engine_binary(),
            PathBuf::from(default_engine_binary())
        );
        let cfg = EngineConfig {
            engine_path: Some("/opt/eye/bin/eye".to_string()),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.engine_binary(), PathBuf::from("/opt/eye/bin/eye"));
    }
}
