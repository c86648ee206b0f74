//! Shared helpers for the socket-level integration tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use arena_server::{
    server::{bind_ephemeral, ShutdownHandle, StatusProbe},
    store::EntityStore,
};
use arena_shared::config::ServerConfig;
use tokio::task::JoinHandle;

/// Generous upper bound for any single expected message.
pub const WAIT: Duration = Duration::from_secs(2);

/// A server running in the background on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub probe: StatusProbe,
    /// Direct access for seeding world state.
    pub store: Arc<EntityStore>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(cfg: ServerConfig) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info")
            .with_test_writer()
            .try_init();

        let (server, cfg) = bind_ephemeral(cfg).await?;
        let addr = cfg.server_addr.parse()?;
        let shutdown = server.shutdown_handle();
        let probe = server.status_probe();
        let store = server.store();
        let handle = tokio::spawn(server.run());
        Ok(Self {
            addr,
            shutdown,
            probe,
            store,
            handle,
        })
    }

    /// Config with a fast sync tick and a spawner that never fires during a
    /// test unless asked to.
    pub fn quiet_config() -> ServerConfig {
        ServerConfig {
            sync_interval_ms: 20,
            spawn_interval_ms: 60_000,
            ..Default::default()
        }
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.trigger();
        tokio::time::timeout(WAIT, self.handle).await???;
        Ok(())
    }
}
