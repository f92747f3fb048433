//! Mesh daemon capability
//!
//! Everything the supervisor, accountant and status API know about the mesh
//! daemon goes through this trait. Parsing of the daemon's native output lives
//! entirely inside the implementations.

use crate::types::{MeshStatus, PeerSnapshot, SessionConfig};
use crate::Result;
use async_trait::async_trait;

/// Mesh daemon interface
#[async_trait]
pub trait MeshProvider: Send + Sync {
    /// Whether the daemon answers status queries at all
    async fn is_running(&self) -> bool;

    /// Login state, self node and peers
    async fn status(&self) -> Result<MeshStatus>;

    /// Current peers with their cumulative traffic counters
    async fn traffic(&self) -> Result<Vec<PeerSnapshot>>;

    /// Join the mesh with the given session parameters
    async fn login(&self, config: &SessionConfig) -> Result<()>;

    /// Leave the mesh
    async fn logout(&self) -> Result<()>;

    /// Daemon version string
    async fn version(&self) -> Result<String>;
}
