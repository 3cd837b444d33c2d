use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::ChildKiller;
use tokio::time::Instant;

use crate::decode::Decoder;
use crate::error::PtyError;
use crate::mailbox::Mailbox;
use crate::pty::PtyHandle;
use crate::spec::SpawnSpec;

/// Unique identifier for a session within this process.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long to wait for the process to be reaped after a forced kill.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);
/// How long to keep collecting output from a runtime that died on startup.
const STARTUP_OUTPUT_WAIT: Duration = Duration::from_millis(500);
/// The reader can see EOF shortly before the child is reapable.
const EOF_REAP_WAIT: Duration = Duration::from_millis(500);

/// Lifecycle of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unstarted => f.write_str("unstarted"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopped => f.write_str("stopped"),
        }
    }
}

/// One interactive shell inside a container, driven through a PTY.
///
/// Turns are serialized: `send`, `receive`, and `stop` take `&mut self`.
/// The reader thread runs concurrently and only talks to the session
/// through its [`Mailbox`]. To abandon a session from elsewhere, use an
/// [`AbortHandle`].
pub struct Session {
    id: SessionId,
    spec: SpawnSpec,
    state: SessionState,
    pty: Option<PtyHandle>,
    mailbox: Option<Mailbox>,
    decoder: Decoder,
    stopping: Arc<AtomicBool>,
    exit_code: Option<u32>,
}

impl Session {
    /// Create an unstarted session.
    pub fn new(spec: SpawnSpec) -> Self {
        let decoder = Decoder::new(spec.encoding);
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            spec,
            state: SessionState::Unstarted,
            pty: None,
            mailbox: None,
            decoder,
            stopping: Arc::new(AtomicBool::new(false)),
            exit_code: None,
        }
    }

    /// Create and start a session in one step.
    pub async fn spawn(spec: SpawnSpec) -> Result<Self, PtyError> {
        let mut session = Self::new(spec);
        session.start().await?;
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state, after checking whether the child has exited.
    pub fn state(&mut self) -> SessionState {
        if self.state == SessionState::Running {
            self.refresh_exit();
        }
        self.state
    }

    pub fn is_running(&mut self) -> bool {
        self.state() == SessionState::Running
    }

    /// The container process's exit status, once known.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Spawn the container on a fresh PTY and start the reader thread.
    ///
    /// On failure the session stays `Unstarted` and `start` may be retried.
    pub async fn start(&mut self) -> Result<(), PtyError> {
        match self.state {
            SessionState::Running => return Err(PtyError::AlreadyStarted),
            SessionState::Stopped => return Err(PtyError::Stopped),
            SessionState::Unstarted => {}
        }

        let mut argv = vec![self.spec.runtime.clone()];
        argv.extend(self.spec.runtime_args()?);
        log::info!("session {}: starting `{}`", self.id, argv.join(" "));

        let mut pty = PtyHandle::spawn(&argv, self.spec.cols, self.spec.rows)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader unavailable".to_string()))?;

        let stopping = Arc::new(AtomicBool::new(false));
        let mut mailbox = Mailbox::spawn_reader(
            format!("workenv-pty-{}", self.id),
            reader,
            self.spec.read_chunk,
            Arc::clone(&stopping),
        )
        .map_err(PtyError::spawn_failed("failed to start PTY reader"))?;

        if !self.spec.startup_grace.is_zero() {
            tokio::time::sleep(self.spec.startup_grace).await;
            if let Some(code) = pty.try_wait() {
                let output = mailbox.collect_remaining(STARTUP_OUTPUT_WAIT).await;
                let output = self.spec.encoding.decode_lossy(&output);
                log::warn!("session {}: runtime exited during startup ({code})", self.id);
                return Err(PtyError::SpawnFailed(format!(
                    "`{}` exited with status {code} during startup: {}",
                    self.spec.runtime,
                    output.trim()
                )));
            }
        }

        self.pty = Some(pty);
        self.mailbox = Some(mailbox);
        self.stopping = stopping;
        self.decoder = Decoder::new(self.spec.encoding);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Type `text` into the shell, followed by a newline unless it already
    /// ends with one.
    pub fn send(&mut self, text: &str) -> Result<(), PtyError> {
        let payload = line_payload(text, true);
        self.write_text(&payload)
    }

    /// Type `text` exactly as given, e.g. `"\x03"` to interrupt.
    pub fn send_raw(&mut self, text: &str) -> Result<(), PtyError> {
        self.write_text(text)
    }

    fn write_text(&mut self, text: &str) -> Result<(), PtyError> {
        match self.state {
            SessionState::Unstarted => return Err(PtyError::NotStarted),
            SessionState::Stopped if self.exit_code.is_some() => {
                return Err(PtyError::ProcessExited)
            }
            SessionState::Stopped => return Err(PtyError::Stopped),
            SessionState::Running => {}
        }

        if self.refresh_exit() {
            return Err(PtyError::ProcessExited);
        }

        let bytes = self.spec.encoding.encode(text);
        let pty = self.pty.as_mut().ok_or(PtyError::NotStarted)?;
        match pty.write(&bytes) {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.refresh_exit() {
                    Err(PtyError::ProcessExited)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Return everything that has arrived so far.
    ///
    /// Waits up to `timeout` for the first chunk, then drains without
    /// blocking. Empty on timeout, before `start`, and at end of stream.
    pub async fn receive(&mut self, timeout: Duration) -> String {
        let Some(mailbox) = self.mailbox.as_mut() else {
            return String::new();
        };

        let bytes = mailbox.collect(timeout).await;
        let mut text = self.decoder.decode(&bytes);
        if mailbox.is_closed() {
            text.push_str(&self.decoder.finish());
        }
        text
    }

    /// Accumulate output until it contains `marker` or `timeout` elapses.
    ///
    /// Never fails: on timeout or end of stream the partial output is
    /// returned, and the caller checks for the marker itself. Output that
    /// happens to contain the marker ends the wait early.
    pub async fn receive_until(&mut self, marker: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let chunk = self.receive(remaining).await;
            if chunk.is_empty() {
                if self.at_end_of_stream() {
                    self.reap_after_eof(deadline).await;
                    break;
                }
                continue;
            }

            collected.push_str(&chunk);
            if collected.contains(marker) {
                break;
            }
        }

        collected
    }

    /// A handle that can kill the child from another thread.
    ///
    /// `None` unless the session is running.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        if self.state != SessionState::Running {
            return None;
        }
        let pty = self.pty.as_ref()?;
        Some(AbortHandle {
            killer: Arc::new(Mutex::new(pty.clone_killer())),
            stopping: Arc::clone(&self.stopping),
        })
    }

    /// Terminate the container and release the PTY.
    ///
    /// Asks the process to exit, escalates to a forced kill after
    /// `kill_timeout`, and always ends `Stopped`. Teardown errors are
    /// logged, never returned. Calling it again, or before `start`, is a
    /// no-op apart from the state change.
    pub async fn stop(&mut self, kill_timeout: Duration) {
        self.stopping.store(true, Ordering::Release);

        if let Some(mut pty) = self.pty.take() {
            if self.exit_code.is_none() && pty.is_alive() {
                if let Err(e) = pty.terminate() {
                    log::debug!("session {}: terminate failed: {e}", self.id);
                }
                if wait_for_exit(&mut pty, kill_timeout).await.is_none() {
                    log::info!(
                        "session {}: no exit after {:?}, killing",
                        self.id,
                        kill_timeout
                    );
                    if let Err(e) = pty.kill() {
                        log::warn!("session {}: kill failed: {e}", self.id);
                    }
                    wait_for_exit(&mut pty, FORCE_KILL_WAIT).await;
                }
            }
            if self.exit_code.is_none() {
                self.exit_code = pty.try_wait();
            }
            pty.release();
        }

        self.mailbox = None;
        if self.state != SessionState::Stopped {
            log::info!(
                "session {}: {} -> stopped (exit {:?})",
                self.id,
                self.state,
                self.exit_code
            );
        }
        self.state = SessionState::Stopped;
    }

    /// Poll for the child's exit, for at most `EOF_REAP_WAIT` and never
    /// past `deadline`.
    async fn reap_after_eof(&mut self, deadline: Instant) {
        let deadline = deadline.min(Instant::now() + EOF_REAP_WAIT);
        while self.pty.is_some() && !self.refresh_exit() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(EXIT_POLL_INTERVAL)).await;
        }
    }

    fn at_end_of_stream(&self) -> bool {
        self.mailbox.as_ref().map_or(true, Mailbox::is_closed)
    }

    /// Record an exit if the child is gone. Returns `true` if it has exited.
    ///
    /// The mailbox is kept so final output can still be received.
    fn refresh_exit(&mut self) -> bool {
        let Some(pty) = self.pty.as_mut() else {
            return self.exit_code.is_some();
        };
        match pty.try_wait() {
            Some(code) => {
                if self.state == SessionState::Running {
                    log::info!("session {}: container exited with status {code}", self.id);
                }
                self.exit_code = Some(code);
                self.state = SessionState::Stopped;
                pty.release();
                true
            }
            None => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Release);
    }
}

/// Kills a session's child from outside the owning thread.
#[derive(Clone)]
pub struct AbortHandle {
    killer: Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>,
    stopping: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Force-kill the container process. Errors are ignored.
    ///
    /// The owning session observes the exit on its next `send` or `state`
    /// call, and its `receive` reaches end of stream.
    pub fn abort(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Ok(mut killer) = self.killer.lock() {
            if let Err(e) = killer.kill() {
                log::debug!("abort: kill failed: {e}");
            }
        }
    }
}

/// Poll for exit until `limit` elapses.
async fn wait_for_exit(pty: &mut PtyHandle, limit: Duration) -> Option<u32> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(code) = pty.try_wait() {
            return Some(code);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// `text` plus exactly one trailing newline when `newline` is set.
fn line_payload(text: &str, newline: bool) -> String {
    let mut payload = text.to_string();
    if newline && !payload.ends_with('\n') {
        payload.push('\n');
    }
    payload
}
