//! Outbound delivery capability.
//!
//! Handlers and schedulers never talk to sockets. They are handed an
//! `Outbound` at construction and call `send_to` / `broadcast` on it. Both
//! calls are fire-and-forget: delivery failures are the implementation's
//! concern and are never reported back.

use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

use arena_shared::protocol::{decode_event, encode_event, Event};
use tracing::error;

/// Opaque identifier of one client connection, issued by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Send primitives offered by the transport.
pub trait Outbound: Send + Sync {
    /// Queues `message` for one connection.
    fn send_to(&self, conn: ConnectionId, message: &str);
    /// Queues `message` for every connected client.
    fn broadcast(&self, message: &str);
}

/// Typed sends on top of `Outbound`.
pub trait OutboundExt: Outbound {
    fn send_event_to(&self, conn: ConnectionId, event: &Event) {
        match encode_event(event) {
            Ok(text) => self.send_to(conn, &text),
            Err(e) => error!(%conn, method = event.method(), error = %e, "Dropping unencodable event"),
        }
    }

    fn broadcast_event(&self, event: &Event) {
        match encode_event(event) {
            Ok(text) => self.broadcast(&text),
            Err(e) => error!(method = event.method(), error = %e, "Dropping unencodable broadcast"),
        }
    }
}

impl<T: Outbound + ?Sized> OutboundExt for T {}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullOutbound;

impl Outbound for NullOutbound {
    fn send_to(&self, _conn: ConnectionId, _message: &str) {}
    fn broadcast(&self, _message: &str) {}
}

/// One captured delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    To(ConnectionId, String),
    Broadcast(String),
}

/// Records every call in order. Used by headless tests.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    log: Mutex<Vec<Sent>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<Sent>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.log())
    }

    /// Decoded events sent to `conn` only (broadcasts excluded).
    pub fn events_to(&self, conn: ConnectionId) -> Vec<Event> {
        self.log()
            .iter()
            .filter_map(|s| match s {
                Sent::To(c, text) if *c == conn => decode_event(text).ok(),
                _ => None,
            })
            .collect()
    }

    /// Decoded broadcast events.
    pub fn broadcasts(&self) -> Vec<Event> {
        self.log()
            .iter()
            .filter_map(|s| match s {
                Sent::Broadcast(text) => decode_event(text).ok(),
                Sent::To(..) => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }
}

impl Outbound for RecordingOutbound {
    fn send_to(&self, conn: ConnectionId, message: &str) {
        self.log().push(Sent::To(conn, message.to_string()));
    }

    fn broadcast(&self, message: &str) {
        self.log().push(Sent::Broadcast(message.to_string()));
    }
}
