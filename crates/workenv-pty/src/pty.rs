use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::error::PtyError;

/// Owns a portable-pty child process, the master side, and its writer.
///
/// The slave side is dropped right after spawning, so the only holders of
/// the slave are the child and its descendants. Once they exit, the reader
/// sees EOF.
pub struct PtyHandle {
    /// Kept only to hold the master side open until `release`.
    _master: Option<Box<dyn MasterPty + Send>>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `argv[0]` with the remaining arguments on a new PTY.
    pub fn spawn(argv: &[String], cols: u16, rows: u16) -> Result<Self, PtyError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PtyError::SpawnFailed("empty command line".to_string()))?;

        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::spawn_failed("failed to open PTY"))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn `{program}`: {e}")))?;

        // The parent has no use for the slave end.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(PtyError::spawn_failed("failed to clone reader"))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(PtyError::spawn_failed("failed to take writer"))?;

        log::info!("spawned `{program}` on PTY (pid {:?})", child.process_id());

        Ok(Self {
            _master: Some(pair.master),
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Write bytes to the PTY master, as if typed.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or(PtyError::Stopped)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Extract the PTY reader for use on a dedicated thread.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// A killer that can terminate the child from another thread.
    pub fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.child.clone_killer()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Ask the child to exit (SIGTERM on unix).
    pub fn terminate(&mut self) -> Result<(), PtyError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match self.child.process_id() {
                Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                    .map_err(|e| PtyError::Io(std::io::Error::from(e))),
                None => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    /// Forcefully kill the child.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        self.child.kill()?;
        Ok(())
    }

    /// Close the master side and its writer. Safe to call more than once.
    pub fn release(&mut self) {
        self.writer = None;
        self._master = None;
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            log::debug!("killing PTY child {:?} on drop", self.child.process_id());
            let _ = self.child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh() -> Vec<String> {
        vec!["/bin/sh".to_string()]
    }

    fn read_until(reader: &mut dyn Read, needle: &str, limit: Duration) -> String {
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(&sh(), 80, 24);
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
        assert!(handle.process_id().is_some());
    }

    #[test]
    fn test_spawn_empty_argv_fails() {
        assert!(matches!(
            PtyHandle::spawn(&[], 80, 24),
            Err(PtyError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let argv = vec!["/nonexistent/workenv-runtime".to_string()];
        assert!(matches!(
            PtyHandle::spawn(&argv, 80, 24),
            Err(PtyError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_write_read_echo() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        let mut reader = handle.take_reader().unwrap();
        assert!(handle.take_reader().is_none());

        handle.write(b"echo WORKENV_TEST_OK\n").unwrap();

        let text = read_until(&mut reader, "WORKENV_TEST_OK\r\n", Duration::from_secs(3));
        assert!(
            text.contains("WORKENV_TEST_OK"),
            "Expected output to contain WORKENV_TEST_OK, got: {text}"
        );
    }

    #[test]
    fn test_child_exit() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        let mut reader = handle.take_reader().unwrap();
        handle.write(b"exit 3\n").unwrap();

        let drain = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        let _ = drain.join();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(handle.try_wait(), Some(3));
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_terminate_then_kill_stops_child() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        // Interactive shells ignore SIGTERM, so follow up with a kill.
        handle.terminate().unwrap();
        handle.kill().ok();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.is_alive() {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_write_after_release_fails() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        handle.release();
        handle.release();
        assert!(matches!(handle.write(b"x"), Err(PtyError::Stopped)));
    }
}
