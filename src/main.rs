//! Request Guard Agent for Zentinel
//!
//! Screens requests for blocked IPs, rate limits and attack patterns.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{BufReader, BufWriter};
use tokio::net::UnixListener;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_request_guard::alerts::AlertSink;
use zentinel_agent_request_guard::block_list::MemoryBlockList;
use zentinel_agent_request_guard::protocol::serve_connection;
use zentinel_agent_request_guard::store::MemoryCounterStore;
use zentinel_agent_request_guard::{GuardConfig, RequestGuardAgent};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-request-guard")]
#[command(author, version, about = "Request guard agent for Zentinel")]
struct Args {
    /// Unix socket path for the agent server
    #[arg(short, long, default_value = "/tmp/zentinel-request-guard.sock")]
    socket: PathBuf,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between sweeps of expired rate counters
    #[arg(long, default_value_t = 60)]
    sweep_interval: u64,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_level(level: &str) -> Result<Level> {
    level
        .parse()
        .with_context(|| format!("invalid log level '{}'", level))
}

fn init_logging(json: bool, level: &str) -> Result<()> {
    let level = parse_level(level)?;

    let env_filter = EnvFilter::from_default_env()
        .add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<GuardConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
                serde_yaml::from_str(&content)?
            } else {
                serde_json::from_str(&content)?
            }
        }
        None => GuardConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.json_logs, &args.log_level)?;

    let config = load_config(args.config.as_deref())?;

    let (alerts, alert_rx) = AlertSink::channel(config.alerts.queue_capacity);
    alert_rx.spawn_logger();

    let counters = Arc::new(MemoryCounterStore::new(config.store.sweep_interval_ops));
    let block_list = Arc::new(MemoryBlockList::new(config.store.max_blocked_ips));

    let sweeper = Arc::clone(&counters);
    let period = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sweeper.purge_expired();
        }
    });

    let agent = RequestGuardAgent::new(config, counters, block_list, alerts);

    info!(
        socket = %args.socket.display(),
        "Starting request-guard agent"
    );
    run_uds_server(args.socket, agent).await
}

/// Serve newline-delimited JSON commands on a Unix socket.
async fn run_uds_server(socket_path: PathBuf, agent: RequestGuardAgent) -> Result<()> {
    // Remove existing socket file if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "UDS server listening");

    let agent = Arc::new(agent);

    loop {
        let (stream, _) = listener.accept().await?;
        let agent = Arc::clone(&agent);

        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let reader = BufReader::new(read_half);
            let writer = BufWriter::new(write_half);

            match serve_connection(&agent, reader, writer).await {
                Ok(()) => debug!("Client disconnected"),
                Err(e) => error!(error = %e, "Connection failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("verbose").is_err());
    }
}
