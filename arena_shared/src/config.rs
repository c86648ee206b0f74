//! Configuration system.
//!
//! Loads server configuration from JSON strings/files. Every field has a
//! default so a partial file is enough.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Square region, centred on the origin, where items appear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnRegion {
    /// x and z are drawn from `[-half_extent, half_extent)`.
    pub half_extent: f32,
    /// Fixed y of every spawned item.
    pub height: f32,
}

impl Default for SpawnRegion {
    fn default() -> Self {
        Self {
            half_extent: 5.0,
            height: 0.5,
        }
    }
}

/// Root server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Period of the position-sync broadcast.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Period of the item spawner.
    #[serde(default = "default_spawn_interval_ms")]
    pub spawn_interval_ms: u64,
    #[serde(default)]
    pub spawn_region: SpawnRegion,
    /// When set, the full item list is re-broadcast on this period.
    #[serde(default)]
    pub environment_resync_ms: Option<u64>,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_sync_interval_ms() -> u64 {
    50
}

fn default_spawn_interval_ms() -> u64 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            sync_interval_ms: default_sync_interval_ms(),
            spawn_interval_ms: default_spawn_interval_ms(),
            spawn_region: SpawnRegion::default(),
            environment_resync_ms: None,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Rejects values the schedulers cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync_interval_ms == 0 {
            bail!("sync_interval_ms must be positive");
        }
        if self.spawn_interval_ms == 0 {
            bail!("spawn_interval_ms must be positive");
        }
        if self.environment_resync_ms == Some(0) {
            bail!("environment_resync_ms must be positive when set");
        }
        let region = self.spawn_region;
        if !region.half_extent.is_finite() || region.half_extent <= 0.0 {
            bail!("spawn_region.half_extent must be a positive number");
        }
        if !region.height.is_finite() {
            bail!("spawn_region.height must be finite");
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn spawn_interval(&self) -> Duration {
        Duration::from_millis(self.spawn_interval_ms)
    }

    pub fn environment_resync_interval(&self) -> Option<Duration> {
        self.environment_resync_ms.map(Duration::from_millis)
    }
}
