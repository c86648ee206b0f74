//! TCP transport adapter.
//!
//! Accepts framed connections, feeds their inbound frames to `Handlers` in
//! arrival order, and implements `Outbound` through bounded per-connection
//! send queues. A peer whose queue fills up is dropped; a dead or slow peer
//! never affects anyone else's queue.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use arena_shared::net::{FrameConn, FrameListener, MAX_REQUEST_FRAME_LEN};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinSet,
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    handlers::Handlers,
    outbound::{ConnectionId, Outbound},
};

/// Messages a connection may have queued before it counts as stalled.
pub const OUTBOUND_QUEUE_LEN: usize = 1024;

/// How long a closing connection may spend flushing queued output.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Peer {
    queue: mpsc::Sender<String>,
    kick: watch::Sender<bool>,
}

/// Receiving side of a registered connection.
#[derive(Debug)]
pub struct PeerQueue {
    /// Outbound messages, in send order.
    pub messages: mpsc::Receiver<String>,
    /// Flips to `true` when the registry drops the connection.
    pub kicked: watch::Receiver<bool>,
}

/// Live connections and their outbound queues.
#[derive(Debug)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    queue_len: usize,
    conns: RwLock<HashMap<ConnectionId, Peer>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_queue_len(OUTBOUND_QUEUE_LEN)
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_len(queue_len: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            queue_len: queue_len.max(1),
            conns: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Peer>> {
        self.conns.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Peer>> {
        self.conns.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocates an id and a queue for a new connection.
    pub fn register(&self) -> (ConnectionId, PeerQueue) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (queue, messages) = mpsc::channel(self.queue_len);
        let (kick, kicked) = watch::channel(false);
        self.write().insert(id, Peer { queue, kick });
        (id, PeerQueue { messages, kicked })
    }

    /// Drops the connection's queue. Already queued messages are still
    /// flushed by its writer.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Unregisters a peer that stopped draining its queue and tells its
    /// connection task to close.
    fn drop_stalled(&self, id: ConnectionId) {
        if let Some(peer) = self.write().remove(&id) {
            warn!(conn = %id, queued = self.queue_len, "Outbound queue full, dropping connection");
            peer.kick.send_replace(true);
        }
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Queues `message` for one peer. Returns false if the queue is full.
fn offer(conn: ConnectionId, peer: &Peer, message: &str) -> bool {
    match peer.queue.try_send(message.to_string()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => false,
        Err(TrySendError::Closed(_)) => {
            debug!(%conn, "Send to closed connection dropped");
            true
        }
    }
}

impl Outbound for ConnectionRegistry {
    fn send_to(&self, conn: ConnectionId, message: &str) {
        let stalled = match self.read().get(&conn) {
            Some(peer) => !offer(conn, peer, message),
            None => {
                debug!(%conn, "Send to unknown connection dropped");
                false
            }
        };
        if stalled {
            self.drop_stalled(conn);
        }
    }

    fn broadcast(&self, message: &str) {
        let stalled: Vec<ConnectionId> = self
            .read()
            .iter()
            .filter(|(conn, peer)| !offer(**conn, peer, message))
            .map(|(conn, _)| *conn)
            .collect();
        for conn in stalled {
            self.drop_stalled(conn);
        }
    }
}

/// Accept loop plus per-connection tasks.
pub struct Transport {
    listener: FrameListener,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<Handlers>,
}

impl Transport {
    pub fn new(
        listener: FrameListener,
        registry: Arc<ConnectionRegistry>,
        handlers: Arc<Handlers>,
    ) -> Self {
        Self {
            listener,
            registry,
            handlers,
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` flips, then stops accepting and waits for
    /// every connection task to finish its current message.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        connections.spawn(serve_connection(
                            conn,
                            peer,
                            self.registry.clone(),
                            self.handlers.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        time::sleep(Duration::from_millis(10)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                // Reap finished connections so the set does not grow.
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }

        info!(open = connections.len(), "Transport stopping");
        while let Some(res) = connections.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Connection task panicked");
            }
        }
    }
}

async fn serve_connection(
    conn: FrameConn,
    peer: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<Handlers>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (
        id,
        PeerQueue {
            mut messages,
            mut kicked,
        },
    ) = registry.register();
    info!(conn = %id, %peer, "Client connected");

    let (mut reader, mut writer) = conn.with_max_frame_len(MAX_REQUEST_FRAME_LEN).into_split();
    let mut writer_task = tokio::spawn(async move {
        while let Some(text) = messages.recv().await {
            if let Err(e) = writer.send(&text).await {
                warn!(conn = %id, error = %e, "Write failed, closing connection");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });
    let mut writer_done = false;

    loop {
        if *shutdown.borrow() || *kicked.borrow() {
            break;
        }
        let frame = tokio::select! {
            frame = reader.recv() => frame,
            res = &mut writer_task => {
                writer_done = true;
                if let Err(e) = res {
                    error!(conn = %id, error = %e, "Writer task panicked");
                }
                break;
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            changed = kicked.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };
        match frame {
            Ok(Some(text)) => {
                if let Err(e) = handlers.dispatch(id, &text) {
                    warn!(conn = %id, error = %e, "Dropped inbound message");
                }
            }
            Ok(None) => {
                info!(conn = %id, "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(conn = %id, error = %e, "Connection read failed");
                break;
            }
        }
    }

    registry.unregister(id);
    if writer_done {
        info!(conn = %id, "Connection closed after write failure");
        return;
    }
    if *kicked.borrow() {
        writer_task.abort();
    }
    match time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => error!(conn = %id, error = %e, "Writer task panicked"),
        Err(_) => {
            debug!(conn = %id, "Writer did not flush in time");
            writer_task.abort();
        }
    }
}
