//! Test-only fake engines.
//!
//! Each fake engine is a shell script run through `/bin/sh`, so the script
//! itself never needs to be executable. Before running its body the script
//! records its arguments, which doubles as a "started" marker.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::io::config::EngineConfig;

pub const FAKE_BANNER: &str = "EYE v10.0.0 (fake)";

pub struct FakeEngine {
    dir: TempDir,
    script: PathBuf,
}

impl FakeEngine {
    /// A fake engine running `body` after recording its arguments.
    pub fn new(body: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let script = dir.path().join("eye.sh");
        let args_path = dir.path().join("args.txt");
        let tmp_path = dir.path().join("args.txt.tmp");
        let contents = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{tmp}'\nmv '{tmp}' '{args}'\n{body}",
            tmp = tmp_path.display(),
            args = args_path.display(),
        );
        fs::write(&script, contents).with_context(|| format!("write {}", script.display()))?;
        Ok(Self { dir, script })
    }

    /// Prints the banner on stderr and exactly `stdout` on stdout.
    pub fn succeeding(stdout: &str) -> Result<Self> {
        Self::new(&format!(
            "echo '{FAKE_BANNER}' >&2\nprintf '%s' '{}'\n",
            shell_quote(stdout)
        ))
    }

    /// Prints the banner and an `** ERROR **` line, then exits non-zero.
    pub fn failing(message: &str) -> Result<Self> {
        Self::new(&format!(
            "echo '{FAKE_BANNER}' >&2\nprintf '** ERROR ** %s\\n' '{}' >&2\nexit 1\n",
            shell_quote(message)
        ))
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            engine_path: Some("/bin/sh".to_string()),
            engine_args: vec![self.script.display().to_string()],
            poll_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    /// Arguments of the most recent run, one per line as the script saw them.
    pub fn recorded_args(&self) -> Result<Vec<String>> {
        let path = self.dir.path().join("args.txt");
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(contents.lines().map(str::to_string).collect())
    }

    /// Block until the script has recorded its arguments.
    pub fn wait_until_started(&self) -> Result<()> {
        let path = self.dir.path().join("args.txt");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !path.exists() {
            if Instant::now() >= deadline {
                bail!("fake engine did not start");
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

fn shell_quote(text: &str) -> String {
    text.replace('\'', r"'\''")
}
