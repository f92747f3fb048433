//! Core types for Meshwatch

use serde::{Deserialize, Serialize};

/// Bootstrap parameters for joining the mesh.
///
/// Loaded once per run from a local file, the remote controller, or startup
/// parameters, and never re-derived afterwards.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub auth_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_node: Option<String>,
    #[serde(default)]
    pub accept_routes: bool,
}

impl SessionConfig {
    pub fn new(auth_key: impl Into<String>) -> Self {
        Self {
            auth_key: auth_key.into(),
            ..Default::default()
        }
    }

    pub fn has_auth_key(&self) -> bool {
        !self.auth_key.trim().is_empty()
    }

    /// Drop empty optional strings so `Some("")` never reaches the daemon
    pub fn normalized(mut self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        self.control_url = clean(self.control_url);
        self.hostname = clean(self.hostname);
        self.exit_node = clean(self.exit_node);
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("auth_key", &"<redacted>")
            .field("control_url", &self.control_url)
            .field("hostname", &self.hostname)
            .field("exit_node", &self.exit_node)
            .field("accept_routes", &self.accept_routes)
            .finish()
    }
}

/// Identity of the local node as reported by the mesh daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub hostname: String,
    pub mesh_address: String,
    pub public_key: String,
    pub online: bool,
}

/// One peer as seen in a single daemon query.
///
/// Counters are cumulative since the daemon started; they reset when the
/// daemon restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub public_key: String,
    pub hostname: String,
    pub mesh_address: String,
    #[serde(rename = "allowedIPs", default)]
    pub allowed_ips: Vec<String>,
    pub online: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Full daemon status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStatus {
    pub logged_in: bool,
    pub self_node: Option<NodeInfo>,
    pub peers: Vec<PeerSnapshot>,
}

impl MeshStatus {
    /// Status reported when the daemon answers but has no session
    pub fn logged_out() -> Self {
        Self::default()
    }
}

/// Per-peer traffic delta for one accounting cycle, in megabytes.
///
/// Field names on the wire are `bytesIn` / `bytesOut` for compatibility with
/// existing controllers, even though the values are MB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerBandwidthReport {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "bytesIn")]
    pub bytes_in_mb: f64,
    #[serde(rename = "bytesOut")]
    pub bytes_out_mb: f64,
}

/// Peer membership change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerAction {
    Add,
    Remove,
}

impl std::fmt::Display for PeerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAction::Add => write!(f, "add"),
            PeerAction::Remove => write!(f, "remove"),
        }
    }
}

/// Membership change detected during an accounting cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerChange {
    pub action: PeerAction,
    pub public_key: String,
}

/// Peer view served by the status API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub public_key: String,
    pub hostname: String,
    pub mesh_address: String,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,
    pub connected: bool,
}

impl From<&PeerSnapshot> for PeerInfo {
    fn from(peer: &PeerSnapshot) -> Self {
        Self {
            public_key: peer.public_key.clone(),
            hostname: peer.hostname.clone(),
            mesh_address: peer.mesh_address.clone(),
            allowed_ips: peer.allowed_ips.clone(),
            connected: peer.online,
        }
    }
}

/// Local node view served by the status API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfStatus {
    pub logged_in: bool,
    pub hostname: String,
    pub mesh_address: String,
    pub public_key: String,
    pub online: bool,
    pub peer_count: usize,
}

impl From<&MeshStatus> for SelfStatus {
    fn from(status: &MeshStatus) -> Self {
        let node = status.self_node.clone().unwrap_or_default();
        Self {
            logged_in: status.logged_in,
            hostname: node.hostname,
            mesh_address: node.mesh_address,
            public_key: node.public_key,
            online: node.online,
            peer_count: status.peers.len(),
        }
    }
}
