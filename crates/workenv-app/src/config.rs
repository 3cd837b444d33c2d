//! Configuration for the workenv binary.
//!
//! Loaded from `~/.workenv/config.toml` when present, or from the file given
//! with `--config`. Every key is optional:
//!
//! ```toml
//! runtime = "docker"
//! image = "ctf-agent-workenv"
//! command = ["/bin/bash"]
//! mounts = ["$PWD:/workspace"]
//! encoding = "utf-8"
//!
//! [env]
//! LANG = "C.UTF-8"
//!
//! [prompt]
//! marker = "(WORKENV)"
//! ps1 = '(WORKENV)\u:\w\$ '
//!
//! [screen]
//! rows = 24
//! cols = 80
//!
//! [timeouts]
//! connect_secs = 30
//! command_secs = 120
//! kill_secs = 1
//! startup_grace_ms = 250
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use workenv_pty::{Encoding, SpawnSpec};

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Container runtime executable
    pub runtime: String,
    pub image: String,
    /// Entry command inside the container
    pub command: Vec<String>,
    /// `host:container[:options]` mounts
    pub mounts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub encoding: String,
    /// Bytes per PTY read
    pub read_chunk: usize,
    pub prompt: PromptConfig,
    pub screen: ScreenConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        let spawn = SpawnSpec::default();
        Self {
            runtime: spawn.runtime,
            image: spawn.image,
            command: spawn.command,
            mounts: Vec::new(),
            env: BTreeMap::new(),
            encoding: spawn.encoding.to_string(),
            read_chunk: spawn.read_chunk,
            prompt: PromptConfig::default(),
            screen: ScreenConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Prompt used to detect the end of each command's output
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Distinctive text that only the prompt prints
    pub marker: String,
    /// Value exported as `PS1`; must contain `marker`
    pub ps1: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            marker: "(WORKENV)".to_string(),
            ps1: r"(WORKENV)\u:\w\$ ".to_string(),
        }
    }
}

/// Terminal geometry, shared by the PTY and the renderer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub rows: u16,
    pub cols: u16,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            rows: workenv_vt::DEFAULT_ROWS,
            cols: workenv_vt::DEFAULT_COLS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for the prompt during `check_connection`
    pub connect_secs: u64,
    /// Wait for the prompt after each command
    pub command_secs: u64,
    /// Grace period between SIGTERM and a forced kill
    pub kill_secs: u64,
    /// How long to watch for a runtime that exits right after spawning
    pub startup_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            command_secs: 120,
            kill_secs: 1,
            startup_grace_ms: 250,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn kill(&self) -> Duration {
        Duration::from_secs(self.kill_secs)
    }
}

impl Config {
    /// Config directory path (~/.workenv)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".workenv"))
    }

    /// Default config file path (~/.workenv/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load `path` if given (it must exist), otherwise the default file if
    /// it exists, otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prompt.marker.chars().count() < 2 {
            bail!("prompt.marker must be at least two characters");
        }
        if !self.prompt.ps1.contains(&self.prompt.marker) {
            bail!(
                "prompt.ps1 `{}` does not contain prompt.marker `{}`",
                self.prompt.ps1,
                self.prompt.marker
            );
        }
        if self.command.is_empty() {
            bail!("command must not be empty");
        }
        if self.screen.rows == 0 || self.screen.cols == 0 {
            bail!("screen.rows and screen.cols must be positive");
        }
        self.encoding
            .parse::<Encoding>()
            .map_err(anyhow::Error::msg)?;
        Ok(())
    }

    /// Build the session's spawn spec.
    pub fn spawn_spec(&self) -> anyhow::Result<SpawnSpec> {
        let encoding = self
            .encoding
            .parse::<Encoding>()
            .map_err(anyhow::Error::msg)?;
        Ok(SpawnSpec {
            runtime: self.runtime.clone(),
            image: self.image.clone(),
            command: self.command.clone(),
            mounts: self.mounts.clone(),
            env: self.env.clone(),
            encoding,
            read_chunk: self.read_chunk,
            rows: self.screen.rows,
            cols: self.screen.cols,
            startup_grace: Duration::from_millis(self.timeouts.startup_grace_ms),
        })
    }
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}
