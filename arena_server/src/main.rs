//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--config server.json] [--addr 127.0.0.1:40000] [--sync-ms 50] [--spawn-ms 3000]
//!
//! Command-line flags override values from the config file.
//!
//! Console commands:
//!   status  - Show player/item/connection counts
//!   quit    - Shutdown server

use std::env;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Context;
use arena_server::server::GameServer;
use arena_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    addr: Option<String>,
    sync_ms: Option<u64>,
    spawn_ms: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--sync-ms" if i + 1 < args.len() => {
                out.sync_ms = Some(args[i + 1].parse().context("parse --sync-ms")?);
                i += 2;
            }
            "--spawn-ms" if i + 1 < args.len() => {
                out.spawn_ms = Some(args[i + 1].parse().context("parse --spawn-ms")?);
                i += 2;
            }
            other => {
                warn!(arg = %other, "Ignoring unknown argument");
                i += 1;
            }
        }
    }
    Ok(out)
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut cfg = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(ms) = args.sync_ms {
        cfg.sync_interval_ms = ms;
    }
    if let Some(ms) = args.spawn_ms {
        cfg.spawn_interval_ms = ms;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(parse_args()?)?;
    info!(
        addr = %cfg.server_addr,
        sync_ms = cfg.sync_interval_ms,
        spawn_ms = cfg.spawn_interval_ms,
        "Starting server"
    );

    let server = GameServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let shutdown = server.shutdown_handle();
    let probe = server.status_probe();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while let Some(line) = console_rx.recv().await {
                match line.as_str() {
                    "status" => {
                        let s = probe.status();
                        info!(
                            players = s.players,
                            items = s.items,
                            connections = s.connections,
                            "Status"
                        );
                    }
                    "quit" | "exit" => {
                        info!("Shutdown requested from console");
                        shutdown.trigger();
                        break;
                    }
                    other => warn!(command = %other, "Unknown console command"),
                }
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.trigger();
            }
        });
    }

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    server.run().await
}
