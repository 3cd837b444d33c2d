//! The two agent-facing tools, `check_connection` and `run_command`.
//!
//! Both always return text. Failures are reported as messages the agent can
//! read, never as errors.

use std::time::Duration;

use workenv_pty::{PtyError, Session, SpawnSpec};
use workenv_vt::Renderer;

use crate::config::Config;

pub const CONNECTED: &str = "Work environment shell started successfully.";
pub const NOT_CONNECTED: &str =
    "Work environment shell is not started. Please call check_connection first.";

/// Extra wait after the marker for the rest of the prompt line.
const PROMPT_SETTLE: Duration = Duration::from_millis(100);

/// Owns the current work environment session.
///
/// At most one session is current at a time, and each tool call runs to
/// completion before the next, so `&mut self` is the whole concurrency story.
pub struct Workenv {
    config: Config,
    spawn_spec: SpawnSpec,
    session: Option<Session>,
    renderer: Renderer,
    connected: bool,
}

impl Workenv {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let spawn_spec = config.spawn_spec()?;
        let renderer = Renderer::new(config.screen.rows, config.screen.cols);
        Ok(Self {
            config,
            spawn_spec,
            session: None,
            renderer,
            connected: false,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Start the shell if needed, install the marker prompt, and wait for it.
    pub async fn check_connection(&mut self) -> String {
        match self.connect().await {
            Ok(()) => CONNECTED.to_string(),
            Err(message) => message,
        }
    }

    async fn connect(&mut self) -> Result<(), String> {
        self.connected = false;
        self.discard_dead_session().await;

        if self.session.is_none() {
            let mut session = Session::new(self.spawn_spec.clone());
            session
                .start()
                .await
                .map_err(|e| format!("Failed to start work environment shell: {e}"))?;
            log::info!("work environment session {} started", session.id());
            self.session = Some(session);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(NOT_CONNECTED.to_string());
        };

        let prompt = &self.config.prompt;
        session
            .send(&prompt_command(&prompt.ps1, &prompt.marker))
            .map_err(|e| format!("Failed to start work environment shell: {e}"))?;

        let timeout = self.config.timeouts.connect();
        let output = session.receive_until(&prompt.marker, timeout).await;
        if !output.contains(&prompt.marker) {
            log::warn!("prompt marker not seen within {timeout:?}: {output:?}");
            if !session.is_running() {
                self.discard_dead_session().await;
                return Err(
                    "Failed to start work environment shell: the shell exited during setup"
                        .to_string(),
                );
            }
            return Err(format!(
                "Work environment shell is running but did not show its prompt within {}s.",
                timeout.as_secs()
            ));
        }
        settle(session).await;

        self.connected = true;
        Ok(())
    }

    /// Run `command` in the shell and return the rendered screen.
    pub async fn run_command(&mut self, command: &str) -> String {
        if !self.connected {
            return NOT_CONNECTED.to_string();
        }
        let Some(session) = self.session.as_mut() else {
            self.connected = false;
            return NOT_CONNECTED.to_string();
        };

        match session.send(command) {
            Ok(()) => {}
            Err(PtyError::ProcessExited) | Err(PtyError::Stopped) => {
                let code = session.exit_code();
                self.discard_session().await;
                return shell_exited(code);
            }
            Err(e) => return format!("Error running command: {e}"),
        }

        let marker = &self.config.prompt.marker;
        let timeout = self.config.timeouts.command();
        let output = session.receive_until(marker, timeout).await;
        let finished = output.contains(marker.as_str());
        let mut output = output;
        if finished {
            output.push_str(&settle(session).await);
        }

        let mut text = render_text(&self.renderer, &output);
        if !finished {
            if session.is_running() {
                log::debug!("command `{command}` still running after {timeout:?}");
                push_note(
                    &mut text,
                    &format!(
                        "[no prompt after {}s; the command may still be running]",
                        timeout.as_secs()
                    ),
                );
            } else {
                let code = session.exit_code();
                self.discard_session().await;
                push_note(&mut text, &shell_exited(code));
            }
        }
        text
    }

    /// Stop the current session, if any.
    pub async fn shutdown(&mut self) {
        self.discard_session().await;
    }

    async fn discard_dead_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if !session.is_running() {
                log::info!(
                    "discarding work environment session {} (exit {:?})",
                    session.id(),
                    session.exit_code()
                );
                self.discard_session().await;
            }
        }
    }

    async fn discard_session(&mut self) {
        self.connected = false;
        if let Some(mut session) = self.session.take() {
            session.stop(self.config.timeouts.kill()).await;
        }
    }
}

/// Drain output that follows the marker, typically the rest of the prompt.
async fn settle(session: &mut Session) -> String {
    session.receive(PROMPT_SETTLE).await
}

fn shell_exited(code: Option<u32>) -> String {
    match code {
        Some(code) => format!(
            "Work environment shell exited with status {code}. Please call check_connection to start a new one."
        ),
        None => "Work environment shell exited. Please call check_connection to start a new one."
            .to_string(),
    }
}

/// Render raw turn output and join the lines, dropping trailing blank rows.
fn render_text(renderer: &Renderer, output: &str) -> String {
    let mut lines = renderer.render(output.as_bytes());
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn push_note(text: &mut String, note: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(note);
}

/// `export PS1='...'` for `ps1`, with every occurrence of `marker` split
/// by an empty quote pair so the echoed keystrokes never contain it.
///
/// A one-character marker cannot be split.
pub fn prompt_command(ps1: &str, marker: &str) -> String {
    let mut command = String::from("export PS1='");
    let mut rest = ps1;

    if !marker.is_empty() {
        let half = (marker.chars().count() / 2).max(1);
        let offset = marker
            .char_indices()
            .nth(half)
            .map_or(marker.len(), |(i, _)| i);

        while let Some(start) = rest.find(marker) {
            let at = start + offset;
            command.push_str(&quote_escape(&rest[..at]));
            command.push_str("''");
            rest = &rest[at..];
        }
    }

    command.push_str(&quote_escape(rest));
    command.push('\'');
    command
}

fn quote_escape(s: &str) -> String {
    s.replace('\'', r"'\''")
}
