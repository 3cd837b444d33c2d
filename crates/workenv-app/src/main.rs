mod config;
mod serve;
mod tools;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::{parse_env_pair, Config};
use tools::Workenv;

/// Sandboxed container shell for agents, with rendered plain-text output
#[derive(Parser, Debug)]
#[command(name = "workenv", version, about)]
struct Cli {
    /// Config file (default: ~/.workenv/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Container image to run
    #[arg(long, global = true, env = "WORKENV_IMAGE")]
    image: Option<String>,

    /// Container runtime executable
    #[arg(long, global = true, env = "WORKENV_RUNTIME")]
    runtime: Option<String>,

    /// Mount `host:container[:options]`; repeatable
    #[arg(long = "mount", short = 'v', global = true)]
    mounts: Vec<String>,

    /// Environment variable `KEY=VALUE` for the container; repeatable
    #[arg(long = "env", short = 'e', global = true, value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Interactive loop over stdin (default)
    Repl,
    /// Run each command in turn and print its output
    Run {
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Start the shell and report whether it responds
    Check,
    /// Serve JSON-lines tool calls on stdin/stdout
    Serve,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(image) = &self.image {
            config.image = image.clone();
        }
        if let Some(runtime) = &self.runtime {
            config.runtime = runtime.clone();
        }
        config.mounts.extend(self.mounts.iter().cloned());
        config.env.extend(self.env.iter().cloned());
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries tool output only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config().context("failed to load configuration")?;
    let mut workenv = Workenv::new(config).context("invalid configuration")?;

    let result = match cli.mode.unwrap_or(Mode::Repl) {
        Mode::Repl => repl(&mut workenv).await,
        Mode::Run { commands } => run(&mut workenv, &commands).await,
        Mode::Check => check(&mut workenv).await,
        Mode::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            serve::serve(&mut workenv, stdin, tokio::io::stdout()).await
        }
    };

    workenv.shutdown().await;
    result
}

async fn check(workenv: &mut Workenv) -> anyhow::Result<()> {
    let message = workenv.check_connection().await;
    println!("{message}");
    if !workenv.is_connected() {
        anyhow::bail!("connection check failed");
    }
    Ok(())
}

async fn run(workenv: &mut Workenv, commands: &[String]) -> anyhow::Result<()> {
    check(workenv).await?;
    for command in commands {
        println!("{}", workenv.run_command(command).await);
    }
    Ok(())
}

async fn repl(workenv: &mut Workenv) -> anyhow::Result<()> {
    check(workenv).await?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"workenv> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = line.trim();
        match command {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }

        let output = workenv.run_command(command).await;
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_repl() {
        let cli = Cli::try_parse_from(["workenv"]).unwrap();
        assert!(cli.mode.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "image = \"from-file\"\nmounts = [\"/data:/data\"]\n[env]\nA = \"1\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "workenv",
            "--config",
            path.to_str().unwrap(),
            "--image",
            "from-cli",
            "-v",
            "./src:/src:ro",
            "-e",
            "B=2",
            "run",
            "ls",
            "pwd",
        ])
        .unwrap();

        let config = cli.config().unwrap();
        assert_eq!(config.image, "from-cli");
        assert_eq!(config.mounts, ["/data:/data", "./src:/src:ro"]);
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(config.env.get("B").map(String::as_str), Some("2"));
        assert!(matches!(cli.mode, Some(Mode::Run { commands }) if commands == ["ls", "pwd"]));
    }

    #[test]
    fn test_cli_rejects_bad_env_pair() {
        assert!(Cli::try_parse_from(["workenv", "--env", "NOPE", "check"]).is_err());
    }

    #[test]
    fn test_run_requires_a_command() {
        assert!(Cli::try_parse_from(["workenv", "run"]).is_err());
    }
}
