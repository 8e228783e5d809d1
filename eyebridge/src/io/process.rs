//! Engine process lifecycle: spawn, drain both streams, wait for exit, classify.
//!
//! Process exit is the only completion signal. The reader threads may see
//! end-of-stream in any order and at any time. Once the child has exited they
//! get at most `drain_grace_ms` to reach end-of-stream; a descendant that keeps
//! the pipes open does not hold the run, and whatever was captured by then is
//! classified.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::args::EngineArguments;
use crate::core::classifier::classify;
use crate::core::types::ProcessOutcome;
use crate::error::InvocationError;
use crate::io::config::EngineConfig;

pub const CANCELLED: &str = "engine run cancelled";

#[derive(Debug, Default)]
struct SessionState {
    running: AtomicBool,
    cancelled: AtomicBool,
}

impl SessionState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cloneable handle that can kill the session's in-flight engine from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<SessionState>,
}

impl CancelHandle {
    /// Request the running engine to be killed. The pending `run` resolves to
    /// `LaunchFailure` and never to `Success`, including when the cancel lands
    /// before the engine has been spawned.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

/// Owns at most one engine process at a time.
#[derive(Debug)]
pub struct ProcessSession {
    engine: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
    drain_grace: Duration,
    state: Arc<SessionState>,
}

/// How the wait loop ended.
enum Stop {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}

/// How the post-exit drain ended.
enum Drain {
    Complete,
    Truncated,
    Cancelled,
}

impl ProcessSession {
    /// The engine executable is resolved here, once, not per run.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            engine: config.engine_binary(),
            leading_args: config.engine_args.clone(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            drain_grace: config.drain_grace(),
            state: Arc::new(SessionState::default()),
        }
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Claim the session for one invocation.
    ///
    /// Clears any earlier cancel. A cancel issued while the slot is held, even
    /// before [`run_in`](Self::run_in) spawns the engine, fails the invocation.
    /// Returns `SessionBusy` if another invocation holds the slot.
    pub fn acquire(&self) -> Result<RunSlot<'_>, InvocationError> {
        RunSlot::acquire(&self.state)
    }

    /// Run the engine once and classify what it wrote.
    ///
    /// A non-zero exit status is not an error by itself; the diagnostic stream decides.
    /// Returns `SessionBusy` if another run on this session has not finished.
    pub fn run(&self, args: &EngineArguments) -> Result<ProcessOutcome, InvocationError> {
        let slot = self.acquire()?;
        self.run_in(&slot, args)
    }

    /// Like [`run`](Self::run), inside a slot taken earlier with [`acquire`](Self::acquire).
    #[instrument(skip_all, fields(engine = %self.engine.display(), args = args.len()))]
    pub fn run_in(
        &self,
        slot: &RunSlot<'_>,
        args: &EngineArguments,
    ) -> Result<ProcessOutcome, InvocationError> {
        if !std::ptr::eq(slot.state, Arc::as_ptr(&self.state)) {
            return Err(InvocationError::configuration(
                "run slot belongs to another session",
            ));
        }
        if self.state.is_cancelled() {
            warn!("engine run cancelled before spawn");
            return Ok(ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
        }

        let mut cmd = Command::new(&self.engine);
        cmd.args(&self.leading_args)
            .args(args.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(%args, "spawning engine");
        let deadline = Instant::now() + self.timeout;
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn engine");
                return Ok(ProcessOutcome::LaunchFailure(format!(
                    "failed to spawn {}: {e}",
                    self.engine.display()
                )));
            }
        };

        let stdout = child.stdout.take().ok_or_else(|| not_piped("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_piped("stderr"))?;
        let mut stdout = StreamDrain::spawn("stdout", stdout);
        let mut stderr = StreamDrain::spawn("stderr", stderr);

        let status = match self.wait_for_exit(&mut child, deadline)? {
            Stop::Exited(status) => status,
            Stop::Cancelled => {
                warn!("engine run cancelled, killing");
                kill(&mut child)?;
                return Ok(ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
            }
            Stop::TimedOut => {
                warn!(timeout_secs = self.timeout.as_secs(), "engine timed out, killing");
                kill(&mut child)?;
                return Ok(self.timed_out());
            }
        };

        let drain_until = (Instant::now() + self.drain_grace).min(deadline);
        match self.drain(&mut stdout, &mut stderr, drain_until)? {
            Drain::Complete => {}
            Drain::Truncated => warn!(
                grace_ms = self.drain_grace.as_millis() as u64,
                "engine exited but its output pipes are still open, keeping what was read"
            ),
            Drain::Cancelled => {
                warn!("engine run cancelled while draining output");
                return Ok(ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
            }
        }
        let stdout = stdout.captured();
        let stderr = stderr.captured();

        // A cancel that lands between exit and here still wins.
        if self.state.is_cancelled() {
            warn!("engine run cancelled after exit");
            return Ok(ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
        }

        if !status.success() {
            warn!(exit_code = ?status.code(), "engine exited with non-zero status");
        }
        debug!(
            exit_code = ?status.code(),
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "engine finished"
        );

        let outcome = classify(
            &String::from_utf8_lossy(&stderr),
            &String::from_utf8_lossy(&stdout),
        );
        match &outcome {
            ProcessOutcome::Success(_) => debug!("engine run succeeded"),
            ProcessOutcome::EngineError(message) => warn!(%message, "engine reported an error"),
            ProcessOutcome::LaunchFailure(_) => warn!("engine startup signature missing"),
        }
        Ok(outcome)
    }

    fn timed_out(&self) -> ProcessOutcome {
        ProcessOutcome::LaunchFailure(format!(
            "engine timed out after {}s",
            self.timeout.as_secs()
        ))
    }

    fn wait_for_exit(&self, child: &mut Child, deadline: Instant) -> Result<Stop, InvocationError> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(Stop::TimedOut);
            }
            let slice = self.poll_interval.min(deadline - now);
            if let Some(status) = child
                .wait_timeout(slice)
                .map_err(InvocationError::io("wait for engine"))?
            {
                return Ok(Stop::Exited(status));
            }
            if self.state.is_cancelled() {
                return Ok(Stop::Cancelled);
            }
        }
    }

    /// Wait for both readers to hit end-of-stream, until `until` at the latest.
    fn drain(
        &self,
        stdout: &mut StreamDrain,
        stderr: &mut StreamDrain,
        until: Instant,
    ) -> Result<Drain, InvocationError> {
        loop {
            let slice = self
                .poll_interval
                .min(until.saturating_duration_since(Instant::now()));
            let out_done = stdout
                .wait(slice)
                .map_err(InvocationError::io("read engine stdout"))?;
            let err_done = stderr
                .wait(slice)
                .map_err(InvocationError::io("read engine stderr"))?;
            if out_done && err_done {
                return Ok(Drain::Complete);
            }
            if self.state.is_cancelled() {
                return Ok(Drain::Cancelled);
            }
            if Instant::now() >= until {
                return Ok(Drain::Truncated);
            }
        }
    }
}

/// Marks the session busy for the lifetime of one invocation.
#[derive(Debug)]
pub struct RunSlot<'a> {
    state: &'a SessionState,
}

impl<'a> RunSlot<'a> {
    fn acquire(state: &'a SessionState) -> Result<Self, InvocationError> {
        if state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("rejecting run: engine already running in this session");
            return Err(InvocationError::SessionBusy);
        }
        state.cancelled.store(false, Ordering::SeqCst);
        Ok(Self { state })
    }
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// One output stream read on its own thread into a shared buffer.
///
/// The buffer holds everything read so far, so it can be taken before the
/// reader reaches end-of-stream. An abandoned reader keeps running until the
/// last holder of the pipe closes it.
struct StreamDrain {
    name: &'static str,
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<std::io::Result<()>>,
    finished: bool,
}

impl StreamDrain {
    fn spawn<R: Read + Send + 'static>(name: &'static str, reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            // The receiver is gone once the run has given up on this stream.
            let _ = tx.send(read_stream(reader, &sink));
        });
        Self {
            name,
            buf,
            done,
            finished: false,
        }
    }

    /// Wait up to `slice` for end-of-stream. `Ok(true)` once the stream is finished.
    fn wait(&mut self, slice: Duration) -> std::io::Result<bool> {
        if self.finished {
            return Ok(true);
        }
        match self.done.recv_timeout(slice) {
            Ok(result) => {
                result?;
                self.finished = true;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(std::io::Error::other(format!(
                "{} reader thread panicked",
                self.name
            ))),
        }
    }

    fn captured(&self) -> Vec<u8> {
        match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Kill and reap. The reader threads are left to finish on their own once the
/// pipes close; their buffers are discarded.
fn kill(child: &mut Child) -> Result<(), InvocationError> {
    if let Err(e) = child.kill() {
        warn!(err = %e, "failed to kill engine");
    }
    child
        .wait()
        .map_err(InvocationError::io("wait for engine after kill"))?;
    Ok(())
}

fn not_piped(stream: &str) -> InvocationError {
    InvocationError::Io {
        context: format!("engine {stream}"),
        source: std::io::Error::other("stream was not piped"),
    }
}

fn read_stream<R: Read>(mut reader: R, sink: &Mutex<Vec<u8>>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        match sink.lock() {
            Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::args::{ResolvedSources, build_arguments};
    use crate::core::types::{InvocationRequest, Source};
    use crate::test_support::FakeEngine;

    fn args_for(input: &str) -> EngineArguments {
        let request = InvocationRequest::new().input(Source::path(input));
        build_arguments(
            &request,
            &ResolvedSources {
                inputs: vec![input.to_string()],
                query: None,
            },
        )
    }

    #[test]
    fn successful_run_returns_stdout() {
        let engine = FakeEngine::succeeding(":a :b :c .\n").expect("engine");
        let session = ProcessSession::new(&engine.config());
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert_eq!(outcome, ProcessOutcome::Success(":a :b :c .\n".to_string()));
        assert_eq!(engine.recorded_args().expect("args"), ["data.n3", "--nope"]);
        assert!(!session.is_running());
    }

    #[test]
    fn non_zero_exit_is_still_classified() {
        let engine = FakeEngine::new("echo 'EYE v1' >&2\necho ':x :y :z .'\nexit 2\n")
            .expect("engine");
        let session = ProcessSession::new(&engine.config());
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert_eq!(outcome, ProcessOutcome::Success(":x :y :z .\n".to_string()));
    }

    #[test]
    fn missing_signature_is_launch_failure() {
        let engine = FakeEngine::new("echo 'usage: something else' >&2\nexit 0\n").expect("engine");
        let session = ProcessSession::new(&engine.config());
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert_eq!(
            outcome,
            ProcessOutcome::LaunchFailure("usage: something else\n".to_string())
        );
    }

    #[test]
    fn engine_error_is_extracted() {
        let engine = FakeEngine::failing("syntax error in data.n3").expect("engine");
        let session = ProcessSession::new(&engine.config());
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert_eq!(
            outcome,
            ProcessOutcome::EngineError("syntax error in data.n3".to_string())
        );
    }

    #[test]
    fn missing_executable_is_launch_failure() {
        let config = EngineConfig {
            engine_path: Some("/nonexistent/eyebridge-test/eye".to_string()),
            ..EngineConfig::default()
        };
        let session = ProcessSession::new(&config);
        match session.run(&args_for("data.n3")).expect("run") {
            ProcessOutcome::LaunchFailure(cause) => {
                assert!(cause.contains("failed to spawn"), "{cause}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!session.is_running());
    }

    #[test]
    fn timeout_kills_engine() {
        let engine = FakeEngine::new("echo 'EYE v1' >&2\nexec sleep 30\n").expect("engine");
        let config = EngineConfig {
            timeout_secs: 1,
            ..engine.config()
        };
        let session = ProcessSession::new(&config);
        let started = Instant::now();
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert_eq!(
            outcome,
            ProcessOutcome::LaunchFailure("engine timed out after 1s".to_string())
        );
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn cancel_resolves_pending_run_as_failure() {
        let engine = FakeEngine::new("echo 'EYE v1' >&2\necho ':a :b :c .'\nexec sleep 30\n")
            .expect("engine");
        let session = ProcessSession::new(&engine.config());
        let handle = session.cancel_handle();

        let outcome = thread::scope(|scope| {
            let pending = scope.spawn(|| session.run(&args_for("data.n3")));
            engine.wait_until_started().expect("engine started");
            assert!(handle.is_running());
            handle.cancel();
            pending.join().expect("join")
        })
        .expect("run");

        assert_eq!(outcome, ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
        assert!(!session.is_running());
    }

    #[test]
    fn second_concurrent_run_is_rejected() {
        let engine = FakeEngine::new("echo 'EYE v1' >&2\nexec sleep 30\n").expect("engine");
        let session = ProcessSession::new(&engine.config());

        thread::scope(|scope| {
            let pending = scope.spawn(|| session.run(&args_for("first.n3")));
            engine.wait_until_started().expect("engine started");

            let err = session.run(&args_for("second.n3")).unwrap_err();
            assert!(matches!(err, InvocationError::SessionBusy));

            session.cancel();
            let outcome = pending.join().expect("join").expect("run");
            assert!(!outcome.is_success());
        });
    }

    #[test]
    fn cancel_before_spawn_never_starts_engine() {
        let engine = FakeEngine::succeeding(":a :b :c .").expect("engine");
        let session = ProcessSession::new(&engine.config());

        let slot = session.acquire().expect("slot");
        session.cancel();
        let outcome = session.run_in(&slot, &args_for("data.n3")).expect("run");

        assert_eq!(outcome, ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
        assert!(engine.recorded_args().is_err(), "engine must not have run");
        drop(slot);
        assert!(!session.is_running());
    }

    #[test]
    fn slot_from_another_session_is_rejected() {
        let engine = FakeEngine::succeeding("").expect("engine");
        let first = ProcessSession::new(&engine.config());
        let second = ProcessSession::new(&engine.config());

        let slot = first.acquire().expect("slot");
        let err = second.run_in(&slot, &args_for("data.n3")).unwrap_err();
        assert!(matches!(err, InvocationError::Configuration(_)));
        assert!(engine.recorded_args().is_err());
    }

    #[test]
    fn background_descendant_does_not_hold_run() {
        let engine =
            FakeEngine::new("echo 'EYE v1' >&2\necho ':a :b :c .'\nsleep 10 &\nexit 0\n")
                .expect("engine");
        let config = EngineConfig {
            drain_grace_ms: 200,
            ..engine.config()
        };
        let session = ProcessSession::new(&config);

        let started = Instant::now();
        let outcome = session.run(&args_for("data.n3")).expect("run");

        assert_eq!(outcome, ProcessOutcome::Success(":a :b :c .\n".to_string()));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!session.is_running());
    }

    #[test]
    fn drain_is_bounded_by_timeout() {
        let engine =
            FakeEngine::new("echo 'EYE v1' >&2\necho ':a :b :c .'\nsleep 10 &\nexit 0\n")
                .expect("engine");
        let config = EngineConfig {
            timeout_secs: 1,
            drain_grace_ms: 60_000,
            ..engine.config()
        };
        let session = ProcessSession::new(&config);

        let started = Instant::now();
        let outcome = session.run(&args_for("data.n3")).expect("run");

        assert_eq!(outcome, ProcessOutcome::Success(":a :b :c .\n".to_string()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancel_while_draining_resolves_as_failure() {
        let engine =
            FakeEngine::new("echo 'EYE v1' >&2\necho ':a :b :c .'\nsleep 10 &\nexit 0\n")
                .expect("engine");
        let config = EngineConfig {
            drain_grace_ms: 60_000,
            ..engine.config()
        };
        let session = ProcessSession::new(&config);
        let handle = session.cancel_handle();

        let started = Instant::now();
        let outcome = thread::scope(|scope| {
            let pending = scope.spawn(|| session.run(&args_for("data.n3")));
            engine.wait_until_started().expect("engine started");
            thread::sleep(Duration::from_millis(200));
            handle.cancel();
            pending.join().expect("join")
        })
        .expect("run");

        assert_eq!(outcome, ProcessOutcome::LaunchFailure(CANCELLED.to_string()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn session_is_reusable_after_cancel() {
        let engine = FakeEngine::succeeding(":a :b :c .").expect("engine");
        let session = ProcessSession::new(&engine.config());
        session.cancel();
        let outcome = session.run(&args_for("data.n3")).expect("run");
        assert!(outcome.is_success());
    }
}
