//! `arena_server`
//!
//! Server-side systems:
//! - Entity store (players, items, shared id counter)
//! - Message handlers for client requests
//! - Sync and spawn schedulers
//! - TCP transport adapter
//!
//! Concurrency model:
//! - Every connection is served by its own task; its frames are handled in
//!   arrival order.
//! - Schedulers run as independent tasks.
//! - All of them mutate world state only through `EntityStore`, whose
//!   operations are atomic.

pub mod handlers;
pub mod outbound;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod transport;

pub use server::GameServer;
