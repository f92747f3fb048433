//! Meshwatch Common Library
//!
//! Shared types, the mesh daemon capability and its adapters.

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod provider;
pub mod tailscale;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryMeshProvider;
pub use provider::MeshProvider;
pub use tailscale::TailscaleCli;
pub use types::*;

/// Meshwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
