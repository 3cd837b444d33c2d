//! JSON-lines tool server.
//!
//! One request per line, e.g. `{"tool":"run_command","command":"ls"}`,
//! answered by one `{"output":"..."}` line.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::tools::Workenv;

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    CheckConnection,
    RunCommand { command: String },
}

#[derive(Debug, Serialize)]
pub struct ToolReply {
    pub output: String,
}

impl Workenv {
    pub async fn dispatch(&mut self, call: ToolCall) -> String {
        match call {
            ToolCall::CheckConnection => self.check_connection().await,
            ToolCall::RunCommand { command } => self.run_command(&command).await,
        }
    }
}

/// Answer one request line. Blank lines get no reply.
pub async fn handle_line(workenv: &mut Workenv, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let output = match serde_json::from_str::<ToolCall>(line) {
        Ok(call) => {
            log::debug!("tool call: {call:?}");
            workenv.dispatch(call).await
        }
        Err(e) => format!("Invalid tool call: {e}"),
    };

    match serde_json::to_string(&ToolReply { output }) {
        Ok(reply) => Some(reply),
        Err(e) => {
            log::error!("failed to encode reply: {e}");
            None
        }
    }
}

/// Serve requests from `reader` until EOF, then stop the session.
pub async fn serve<R, W>(workenv: &mut Workenv, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(reply) = handle_line(workenv, &line).await {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    workenv.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tools::NOT_CONNECTED;

    #[test]
    fn test_parse_tool_calls() {
        assert_eq!(
            serde_json::from_str::<ToolCall>(r#"{"tool":"check_connection"}"#).unwrap(),
            ToolCall::CheckConnection
        );
        assert_eq!(
            serde_json::from_str::<ToolCall>(r#"{"tool":"run_command","command":"ls -la"}"#)
                .unwrap(),
            ToolCall::RunCommand {
                command: "ls -la".to_string()
            }
        );
        assert!(serde_json::from_str::<ToolCall>(r#"{"tool":"run_command"}"#).is_err());
        assert!(serde_json::from_str::<ToolCall>(r#"{"tool":"format_disk"}"#).is_err());
    }

    #[tokio::test]
    async fn test_blank_line_has_no_reply() {
        let mut workenv = Workenv::new(Config::default()).unwrap();
        assert_eq!(handle_line(&mut workenv, "   ").await, None);
    }

    #[tokio::test]
    async fn test_malformed_line_is_answered() {
        let mut workenv = Workenv::new(Config::default()).unwrap();
        let reply = handle_line(&mut workenv, "not json").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert!(value["output"]
            .as_str()
            .unwrap()
            .starts_with("Invalid tool call:"));
    }

    #[tokio::test]
    async fn test_serve_replies_line_per_request() {
        let mut workenv = Workenv::new(Config::default()).unwrap();
        let input = b"{\"tool\":\"run_command\",\"command\":\"ls\"}\n\n{\"tool\":\"nope\"}\n";
        let mut output = Vec::new();

        serve(&mut workenv, &input[..], &mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let replies: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["output"], NOT_CONNECTED);
        assert!(replies[1]["output"]
            .as_str()
            .unwrap()
            .starts_with("Invalid tool call:"));
    }
}
