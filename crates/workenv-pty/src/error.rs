/// Errors from session lifecycle and PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// `start` was called on a session that is already running.
    #[error("session already started")]
    AlreadyStarted,
    /// The session was stopped; a new session must be created.
    #[error("session has been stopped")]
    Stopped,
    /// The container runtime could not be spawned, or exited during startup.
    #[error("failed to spawn container: {0}")]
    SpawnFailed(String),
    /// An operation that needs a running session was called before `start`.
    #[error("session not started")]
    NotStarted,
    /// The container process has terminated.
    #[error("container process has exited")]
    ProcessExited,
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtyError {
    /// Wrap a failure during startup as `SpawnFailed`, prefixed by `context`.
    ///
    /// For use with `map_err`, so every way a start can fail reports the
    /// same variant.
    pub(crate) fn spawn_failed<E>(context: &'static str) -> impl FnOnce(E) -> Self
    where
        E: std::fmt::Display,
    {
        move |e| PtyError::SpawnFailed(format!("{context}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failed_wraps_io_errors() {
        let wrap = PtyError::spawn_failed("failed to start PTY reader");
        let err = wrap(std::io::Error::other("thread limit reached"));
        assert!(matches!(
            &err,
            PtyError::SpawnFailed(msg) if msg == "failed to start PTY reader: thread limit reached"
        ));
        assert_eq!(
            err.to_string(),
            "failed to spawn container: failed to start PTY reader: thread limit reached"
        );
    }
}
