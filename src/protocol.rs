//! Newline-delimited JSON protocol spoken over the agent socket.
//!
//! One command per line in, one reply per line out.

use crate::agent::{RequestGuardAgent, StatsSnapshot, Verdict};
use crate::block_list::BlockEntry;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Longest accepted command line, newline excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Message from the proxy or an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Screen a request
    Request { request: Request },
    /// Block an IP; omit `duration_seconds` for an indefinite block
    Block {
        ip: String,
        reason: String,
        #[serde(default)]
        duration_seconds: Option<u64>,
    },
    Unblock { ip: String },
    ListBlocks,
    Stats,
    Ping,
}

/// Reply to a [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Verdict { verdict: Verdict },
    Blocked { entry: BlockEntry },
    Unblocked { entry: Option<BlockEntry> },
    Blocks { entries: Vec<BlockEntry> },
    Stats { stats: StatsSnapshot },
    Pong,
    Error { message: String },
}

impl Reply {
    fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

/// Execute one command against the agent.
pub async fn dispatch(agent: &RequestGuardAgent, command: Command) -> Reply {
    match command {
        Command::Request { request } => Reply::Verdict {
            verdict: agent.on_request(&request).await,
        },
        Command::Block {
            ip,
            reason,
            duration_seconds,
        } => match agent
            .block(&ip, &reason, duration_seconds.map(Duration::from_secs))
            .await
        {
            Ok(entry) => Reply::Blocked { entry },
            Err(e) => Reply::error(e.to_string()),
        },
        Command::Unblock { ip } => match agent.unblock(&ip).await {
            Ok(entry) => Reply::Unblocked { entry },
            Err(e) => Reply::error(e.to_string()),
        },
        Command::ListBlocks => match agent.list_blocks().await {
            Ok(entries) => Reply::Blocks { entries },
            Err(e) => Reply::error(e.to_string()),
        },
        Command::Stats => Reply::Stats {
            stats: agent.stats(),
        },
        Command::Ping => Reply::Pong,
    }
}

/// Parse and execute one line, producing the serialized reply.
pub async fn handle_line(agent: &RequestGuardAgent, line: &str) -> String {
    let reply = match serde_json::from_str::<Command>(line) {
        Ok(command) => dispatch(agent, command).await,
        Err(e) => {
            debug!(error = %e, "Malformed command");
            Reply::error(format!("malformed command: {}", e))
        }
    };

    encode(&reply)
}

fn encode(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","message":"failed to serialize reply: {}"}}"#, e)
    })
}

enum Line {
    Text(String),
    Invalid(String),
    Eof,
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Line::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE_BYTES {
        discard_line(reader).await?;
        return Ok(Line::Invalid(format!(
            "command exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    match std::str::from_utf8(buf) {
        Ok(text) => Ok(Line::Text(text.to_string())),
        Err(e) => Ok(Line::Invalid(format!("command is not valid UTF-8: {}", e))),
    }
}

/// Skip input up to and including the next newline.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                (0, true)
            } else {
                match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                }
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

/// Answer commands from one connection until the peer hangs up.
///
/// Lines that are oversized or not UTF-8 get an `error` reply; the connection stays open.
pub async fn serve_connection<R, W>(
    agent: &RequestGuardAgent,
    mut reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let mut reply = match read_line(&mut reader, &mut buf).await? {
            Line::Eof => return Ok(()),
            Line::Text(line) if line.trim().is_empty() => continue,
            Line::Text(line) => handle_line(agent, &line).await,
            Line::Invalid(message) => {
                debug!(error = %message, "Unreadable command");
                encode(&Reply::error(message))
            }
        };
        reply.push('\n');

        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;

    fn agent() -> RequestGuardAgent {
        RequestGuardAgent::in_memory(GuardConfig::default()).0
    }

    #[tokio::test]
    async fn test_ping() {
        let agent = agent();
        let reply: serde_json::Value =
            serde_json::from_str(&handle_line(&agent, r#"{"type":"ping"}"#).await).unwrap();
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn test_request_verdict() {
        let agent = agent();
        let line = r#"{"type":"request","request":{"method":"GET","path":"/clients","remote_addr":"10.1.1.1"}}"#;
        let reply: serde_json::Value = serde_json::from_str(&handle_line(&agent, line).await).unwrap();
        assert_eq!(reply["type"], "verdict");
        assert_eq!(reply["verdict"]["decision"], "allow");
    }

    #[tokio::test]
    async fn test_block_then_request_denied() {
        let agent = agent();
        let block = r#"{"type":"block","ip":"10.1.1.1","reason":"abuse","duration_seconds":60}"#;
        let reply: serde_json::Value = serde_json::from_str(&handle_line(&agent, block).await).unwrap();
        assert_eq!(reply["type"], "blocked");
        assert_eq!(reply["entry"]["reason"], "abuse");

        let line = r#"{"type":"request","request":{"method":"GET","path":"/","remote_addr":"10.1.1.1"}}"#;
        let reply: serde_json::Value = serde_json::from_str(&handle_line(&agent, line).await).unwrap();
        assert_eq!(reply["verdict"]["decision"], "deny");
        assert_eq!(reply["verdict"]["response"]["status"], 403);

        let list: serde_json::Value =
            serde_json::from_str(&handle_line(&agent, r#"{"type":"list_blocks"}"#).await).unwrap();
        assert_eq!(list["entries"].as_array().map(|a| a.len()), Some(1));

        let unblock: serde_json::Value = serde_json::from_str(
            &handle_line(&agent, r#"{"type":"unblock","ip":"10.1.1.1"}"#).await,
        )
        .unwrap();
        assert_eq!(unblock["entry"]["ip"], "10.1.1.1");
    }

    #[tokio::test]
    async fn test_malformed_line() {
        let agent = agent();
        let reply: serde_json::Value =
            serde_json::from_str(&handle_line(&agent, "not json").await).unwrap();
        assert_eq!(reply["type"], "error");
    }

    async fn roundtrip(agent: RequestGuardAgent, input: Vec<u8>, replies: usize) -> Vec<serde_json::Value> {
        use std::sync::Arc;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let agent = Arc::new(agent);
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let server_agent = Arc::clone(&agent);
        let task = tokio::spawn(async move {
            serve_connection(&server_agent, BufReader::new(server_read), server_write).await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let writer = tokio::spawn(async move {
            client_write.write_all(&input).await.unwrap();
            client_write.shutdown().await.unwrap();
        });

        let mut lines = BufReader::new(client_read).lines();
        let mut out = Vec::new();
        for _ in 0..replies {
            let line = lines.next_line().await.unwrap().expect("reply line");
            out.push(serde_json::from_str(&line).unwrap());
        }
        writer.await.unwrap();
        task.await.unwrap().unwrap();
        out
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_connection_open() {
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(b"{\"type\":\"ping\"}\n");

        let replies = roundtrip(agent(), input, 2).await;
        assert_eq!(replies[0]["type"], "error");
        assert_eq!(replies[1]["type"], "pong");
    }

    #[tokio::test]
    async fn test_oversized_line_rejected_and_skipped() {
        let mut input = vec![b'a'; MAX_LINE_BYTES + 100];
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"ping\"}\r\n");

        let replies = roundtrip(agent(), input, 2).await;
        assert_eq!(replies[0]["type"], "error");
        assert!(replies[0]["message"].as_str().unwrap().contains("exceeds"));
        assert_eq!(replies[1]["type"], "pong");
    }

    #[tokio::test]
    async fn test_canonical_header_case_over_socket() {
        let line = r#"{"type":"request","request":{"method":"GET","path":"/clients","remote_addr":"10.9.9.9","headers":{"X-Forwarded-For":["1.2.3.4"],"User-Agent":["sqlmap/1.7"]}}}"#;
        let mut input = line.as_bytes().to_vec();
        input.push(b'\n');

        let replies = roundtrip(agent(), input, 1).await;
        let events = replies[0]["verdict"]["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["kind"], "suspicious_user_agent");
        assert_eq!(events[0]["ip"], "1.2.3.4");
    }
}
