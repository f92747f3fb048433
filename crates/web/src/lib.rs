//! Meshwatch Status API
//!
//! HTTP surface exposing live mesh state to external consumers.

pub mod routes;
pub mod server;

pub use routes::{status_router, StatusApiState};
pub use server::{serve, serve_listener};
