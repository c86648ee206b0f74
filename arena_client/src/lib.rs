//! `arena_client`
//!
//! Headless client:
//! - Framed TCP connection to the server
//! - Typed request sending / event receiving
//! - Local mirror of the world built from received events
//!
//! Rendering and input live outside this crate.

pub mod client;
pub mod world;

pub use client::ArenaClient;
