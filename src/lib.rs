//! Live chat ingestion over IRC-on-WebSocket.
//!
//! [`engine::ChatCore`] is the pure state machine; [`session::spawn_session`]
//! wraps it in a tokio task wired to the real (or fake) collaborators.

pub mod classify;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod echo;
pub mod engine;
pub mod error;
pub mod heights;
pub mod history;
pub mod message;
pub mod session;
pub mod timer;
pub mod transport;
pub mod viewport;
pub mod wire;
