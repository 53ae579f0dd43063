//! relayd - standalone text-chat relay
//!
//! Loads an optional TOML config file, applies command-line overrides,
//! and runs the relay until Ctrl+C or SIGTERM.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chatrelay::{init_tracing, RelayConfig, RelayServer, WireFormat};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Legacy,
    Json,
}

impl From<Format> for WireFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Legacy => WireFormat::Legacy,
            Format::Json => WireFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "relayd", version, about = "Text-chat relay server")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address (host:port)
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Override the wire format
    #[arg(long, value_enum)]
    wire_format: Option<Format>,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => RelayConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_addr.clone_from(bind);
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(format) = self.wire_format {
            config.wire_format = format.into();
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn terminated() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" })?;

    let config = cli.relay_config()?;
    info!(
        bind = %config.bind_addr,
        max_sessions = config.max_sessions,
        wire_format = ?config.wire_format,
        "starting relayd v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = RelayServer::builder().config(config).build().await?;
    info!(addr = %server.local_addr()?, "relay ready");

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
            () = terminated() => info!("received SIGTERM, shutting down"),
        }
        shutdown.shutdown();
    });

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_apply_on_top_of_defaults() {
        let cli = Cli::parse_from([
            "relayd",
            "--bind",
            "0.0.0.0:6000",
            "--max-sessions",
            "5",
            "--wire-format",
            "json",
        ]);

        let config = cli.relay_config().unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:6000");
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.wire_format, WireFormat::Json);
        assert_eq!(config.outbound_queue, RelayConfig::default().outbound_queue);
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let cli = Cli::parse_from(["relayd", "--config", "/nonexistent/relayd.toml"]);

        let err = cli.relay_config().unwrap_err();

        assert!(err.to_string().contains("/nonexistent/relayd.toml"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
