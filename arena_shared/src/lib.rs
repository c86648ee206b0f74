//! `arena_shared`
//!
//! Libraries shared by the arena server, client and tests.
//!
//! Design goals:
//! - One definition of the wire schema for both directions.
//! - Clear separation of concerns (math, protocol, net, config).
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
}
