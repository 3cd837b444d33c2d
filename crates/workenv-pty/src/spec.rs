use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decode::Encoding;
use crate::error::PtyError;
use crate::mount::Mount;

/// Everything needed to launch one containerized shell.
#[derive(Clone, Debug)]
pub struct SpawnSpec {
    /// Container runtime executable.
    pub runtime: String,
    /// Image to run.
    pub image: String,
    /// Entry command and its arguments inside the container.
    pub command: Vec<String>,
    /// `host:container[:options]` mount strings, resolved at spawn time.
    pub mounts: Vec<String>,
    /// Environment passed into the container with `-e`.
    pub env: BTreeMap<String, String>,
    pub encoding: Encoding,
    /// Bytes requested per PTY read.
    pub read_chunk: usize,
    pub rows: u16,
    pub cols: u16,
    /// How long `start` waits to catch a runtime that exits straight away.
    pub startup_grace: Duration,
}

impl Default for SpawnSpec {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "workenv".to_string(),
            command: vec!["/bin/bash".to_string()],
            mounts: Vec::new(),
            env: BTreeMap::new(),
            encoding: Encoding::Utf8,
            read_chunk: 1024,
            rows: 24,
            cols: 80,
            startup_grace: Duration::from_millis(250),
        }
    }
}

impl SpawnSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Arguments for the runtime, with mounts resolved against the current
    /// directory and environment.
    pub fn runtime_args(&self) -> Result<Vec<String>, PtyError> {
        self.runtime_args_in(std::env::current_dir())
    }

    fn runtime_args_in(&self, cwd: std::io::Result<PathBuf>) -> Result<Vec<String>, PtyError> {
        let cwd = cwd.map_err(PtyError::spawn_failed("no working directory for mounts"))?;
        self.runtime_args_with(&cwd, |name| std::env::var(name).ok())
    }

    /// `run --rm -i -t [-e K=V]... [-v mount]... <image> <command...>`
    pub fn runtime_args_with<F>(&self, cwd: &Path, lookup: F) -> Result<Vec<String>, PtyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.image.is_empty() {
            return Err(PtyError::SpawnFailed("no image configured".to_string()));
        }

        let mut args: Vec<String> = ["run", "--rm", "-i", "-t"]
            .into_iter()
            .map(String::from)
            .collect();

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        for spec in &self.mounts {
            let mount: Mount = spec.parse()?;
            args.push("-v".to_string());
            args.push(mount.resolve_with(cwd, &lookup).to_string());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let spec = SpawnSpec::default();
        let args = spec.runtime_args_with(Path::new("/"), |_| None).unwrap();
        assert_eq!(args, ["run", "--rm", "-i", "-t", "workenv", "/bin/bash"]);
    }

    #[test]
    fn test_env_then_mounts_then_image_and_command() {
        let mut spec = SpawnSpec::new("ctf-box");
        spec.env.insert("TERM".to_string(), "xterm".to_string());
        spec.env.insert("LANG".to_string(), "C.UTF-8".to_string());
        spec.mounts = vec!["$HOME/ctf:/workspace".to_string(), "logs:/var/log:ro".to_string()];
        spec.command = vec!["/bin/sh".to_string(), "-l".to_string()];

        let args = spec
            .runtime_args_with(Path::new("/cwd"), |name| {
                (name == "HOME").then(|| "/home/agent".to_string())
            })
            .unwrap();

        assert_eq!(
            args,
            [
                "run", "--rm", "-i", "-t",
                "-e", "LANG=C.UTF-8",
                "-e", "TERM=xterm",
                "-v", "/home/agent/ctf:/workspace",
                "-v", "logs:/var/log:ro",
                "ctf-box", "/bin/sh", "-l",
            ]
        );
    }

    #[test]
    fn test_invalid_mount_fails_spawn() {
        let mut spec = SpawnSpec::default();
        spec.mounts = vec![":/nowhere".to_string()];
        let err = spec.runtime_args_with(Path::new("/"), |_| None).unwrap_err();
        assert!(matches!(err, PtyError::SpawnFailed(msg) if msg.contains(":/nowhere")));
    }

    #[test]
    fn test_missing_working_directory_fails_spawn() {
        let spec = SpawnSpec::default();
        let cwd = Err(std::io::Error::from(std::io::ErrorKind::NotFound));
        let err = spec.runtime_args_in(cwd).unwrap_err();
        assert!(matches!(err, PtyError::SpawnFailed(msg) if msg.contains("working directory")));
    }

    #[test]
    fn test_empty_image_fails_spawn() {
        let spec = SpawnSpec::new("");
        assert!(matches!(spec.runtime_args(), Err(PtyError::SpawnFailed(_))));
    }
}
