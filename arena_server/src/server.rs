//! Server implementation.
//!
//! Wires the authoritative pieces together:
//! - one `EntityStore`
//! - `Handlers` fed by the TCP `Transport`
//! - sync, spawn and optional environment `RepeatingTask`s
//!
//! All of them share the store through `Arc` and reach clients only via the
//! `ConnectionRegistry`, which is injected as their `Outbound`.
//!
//! Shutdown: `ShutdownHandle::trigger` stops new scheduler ticks and new
//! accepts; messages already being handled run to completion before `run`
//! returns.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use arena_shared::{config::ServerConfig, net::FrameListener};
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::watch;
use tracing::info;

use crate::{
    handlers::Handlers,
    outbound::Outbound,
    scheduler::{environment_tick, spawn_tick, sync_tick, RepeatingTask},
    store::EntityStore,
    transport::{ConnectionRegistry, Transport},
};

/// Clonable trigger for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Counts reported by the console `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub players: usize,
    pub items: usize,
    pub connections: usize,
}

/// Read-only view of a running server.
#[derive(Clone)]
pub struct StatusProbe {
    store: Arc<EntityStore>,
    registry: Arc<ConnectionRegistry>,
}

impl StatusProbe {
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            players: self.store.player_count(),
            items: self.store.item_count(),
            connections: self.registry.len(),
        }
    }
}

/// Game server.
pub struct GameServer {
    pub cfg: ServerConfig,
    store: Arc<EntityStore>,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<Handlers>,
    listener: FrameListener,
    shutdown: ShutdownHandle,
}

impl GameServer {
    /// Validates the config and binds the listen socket.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        cfg.validate().context("invalid config")?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FrameListener::bind(addr).await?;

        let store = Arc::new(EntityStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let handlers = Arc::new(Handlers::new(store.clone(), registry.clone()));
        let (tx, _rx) = watch::channel(false);

        Ok(Self {
            cfg,
            store,
            registry,
            handlers,
            listener,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<EntityStore> {
        self.store.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn status_probe(&self) -> StatusProbe {
        StatusProbe {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }

    fn start_schedulers(&self) -> Vec<RepeatingTask> {
        let mut tasks = Vec::new();

        {
            let store = self.store.clone();
            let out: Arc<dyn Outbound> = self.registry.clone();
            tasks.push(RepeatingTask::spawn(
                "sync",
                self.cfg.sync_interval(),
                self.shutdown.tx.subscribe(),
                move || {
                    sync_tick(&store, out.as_ref());
                },
            ));
        }

        {
            let store = self.store.clone();
            let out: Arc<dyn Outbound> = self.registry.clone();
            let region = self.cfg.spawn_region;
            let mut rng = StdRng::from_entropy();
            tasks.push(RepeatingTask::spawn(
                "spawn",
                self.cfg.spawn_interval(),
                self.shutdown.tx.subscribe(),
                move || {
                    spawn_tick(&store, out.as_ref(), &region, &mut rng);
                },
            ));
        }

        if let Some(period) = self.cfg.environment_resync_interval() {
            let store = self.store.clone();
            let out: Arc<dyn Outbound> = self.registry.clone();
            tasks.push(RepeatingTask::spawn(
                "environment",
                period,
                self.shutdown.tx.subscribe(),
                move || {
                    environment_tick(&store, out.as_ref());
                },
            ));
        }

        tasks
    }

    /// Runs schedulers and the transport until shutdown is triggered.
    pub async fn run(self) -> anyhow::Result<()> {
        let local = self.local_addr()?;
        let tasks = self.start_schedulers();
        info!(
            %local,
            sync_ms = self.cfg.sync_interval_ms,
            spawn_ms = self.cfg.spawn_interval_ms,
            tasks = tasks.len(),
            "Server running"
        );

        let shutdown_rx = self.shutdown.tx.subscribe();
        let transport = Transport::new(self.listener, self.registry.clone(), self.handlers);
        transport.run(shutdown_rx).await;

        for task in tasks {
            task.join().await;
        }

        let status = StatusProbe {
            store: self.store,
            registry: self.registry,
        }
        .status();
        info!(
            players = status.players,
            items = status.items,
            "Server stopped"
        );
        Ok(())
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(cfg: ServerConfig) -> anyhow::Result<(GameServer, ServerConfig)> {
    let mut cfg = ServerConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };
    let server = GameServer::bind(cfg.clone()).await?;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
