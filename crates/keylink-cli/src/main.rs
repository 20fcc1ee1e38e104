//! # keylink
//!
//! Operator CLI for the keyrx daemon: inspect connection status, issue
//! queries and commands, and stream broadcast channels as JSON lines.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keylink_client::settings::{self, apply_env_overrides};
use keylink_client::{Client, ClientConfig, ConnectionEvent, ConnectionState};
use keylink_proto::channels;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Talk to a running keyrx daemon.
#[derive(Parser, Debug)]
#[command(name = "keylink", about = "Real-time client for the keyrx daemon")]
struct Cli {
    /// Daemon WebSocket URL (overrides settings and `KEYLINK_URL`).
    #[arg(long)]
    url: Option<String>,

    /// Settings file (default: `~/.keylink/client.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, print the daemon version and connection state, disconnect.
    Status,
    /// Run a read-only query and print its result.
    Query {
        /// Method name (e.g. `get_profiles`).
        method: String,
        /// Parameters as JSON.
        params: Option<String>,
    },
    /// Run a state-changing command.
    Command {
        /// Method name (e.g. `activate_profile`).
        method: String,
        /// Parameters as JSON.
        params: Option<String>,
    },
    /// Print broadcasts as JSON lines until interrupted.
    Watch {
        /// Channels to watch (default: all known channels).
        channels: Vec<String>,
    },
}

/// Settings file, then env overrides, then `--url`.
fn resolve_config(path: Option<&Path>, url: Option<&str>) -> Result<ClientConfig> {
    let path = path.map_or_else(settings::settings_path, Path::to_path_buf);
    let mut config = settings::load_file(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    apply_env_overrides(&mut config);
    if let Some(url) = url {
        config.url = url.to_string();
    }
    config.validate().context("Invalid client settings")?;
    Ok(config)
}

fn parse_params(raw: Option<&str>) -> Result<Value> {
    raw.map_or(Ok(Value::Null), |raw| {
        serde_json::from_str(raw).with_context(|| format!("PARAMS is not valid JSON: {raw}"))
    })
}

fn watch_channels(requested: Vec<String>) -> Vec<String> {
    if requested.is_empty() {
        channels::ALL.iter().map(|c| (*c).to_string()).collect()
    } else {
        requested
    }
}

async fn connect(config: ClientConfig) -> Result<Client> {
    let url = config.url.clone();
    Client::connect_websocket(config)
        .await
        .with_context(|| format!("Failed to connect to {url}"))
}

async fn status(config: ClientConfig) -> Result<()> {
    let client = connect(config).await?;
    let report = json!({
        "url": client.config().url,
        "version": client.server_version(),
        "state": client.state().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    client.disconnect().await;
    Ok(())
}

async fn call(config: ClientConfig, method: &str, params: Value, command: bool) -> Result<()> {
    let client = connect(config).await?;
    let outcome = if command {
        client.command(method, params).await.map(|()| json!({"ok": true}))
    } else {
        client.query(method, params).await
    };
    client.disconnect().await;
    let result = outcome.with_context(|| format!("{method} failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn watch(mut config: ClientConfig, requested: Vec<String>) -> Result<()> {
    // The daemon only streams key events to clients that asked for them
    config.announce_subscriptions = true;
    let client = connect(config).await?;
    let mut events = client.events();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriptions: Vec<_> = watch_channels(requested)
        .into_iter()
        .map(|channel| {
            let tx = tx.clone();
            client.subscribe(&channel, move |frame| {
                let _ = tx.send(frame.clone());
            })
        })
        .collect();
    drop(tx);
    info!(channels = subscriptions.len(), "watching");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                println!("{}", serde_json::to_string(&frame)?);
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::StateChanged { to, cause, .. }) => {
                    info!(state = %to, cause = ?cause, "connection state changed");
                    if to == ConnectionState::Disconnected {
                        bail!("lost connection to daemon");
                    }
                }
                Ok(ConnectionEvent::ServerFault { message, code }) => {
                    warn!(%message, code = ?code, "daemon fault");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "dropped connection events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    keylink_client::logging::init_subscriber(&args.log_level);

    let config = resolve_config(args.config.as_deref(), args.url.as_deref())?;
    match args.command {
        Command::Status => status(config).await,
        Command::Query { method, params } => {
            let params = parse_params(params.as_deref())?;
            call(config, &method, params, false).await
        }
        Command::Command { method, params } => {
            let params = parse_params(params.as_deref())?;
            call(config, &method, params, true).await
        }
        Command::Watch { channels } => watch(config, channels).await,
    }
}
