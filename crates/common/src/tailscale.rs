//! Tailscale CLI adapter
//!
//! Implements [`MeshProvider`] by shelling out to the `tailscale` binary and
//! decoding `tailscale status --json` into typed structs.

use crate::provider::MeshProvider;
use crate::types::{MeshStatus, NodeInfo, PeerSnapshot, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Backend states in which the node has no usable session
const LOGGED_OUT_STATES: &[&str] = &["NeedsLogin"];

/// Raw `tailscale status --json` document (only the fields we read)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatus {
    #[serde(default)]
    backend_state: Option<String>,
    #[serde(rename = "Self", default)]
    self_node: Option<RawNode>,
    #[serde(default)]
    peer: Option<BTreeMap<String, RawNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawNode {
    host_name: String,
    public_key: String,
    #[serde(rename = "TailscaleIPs")]
    tailscale_ips: Option<Vec<String>>,
    #[serde(rename = "AllowedIPs")]
    allowed_ips: Option<Vec<String>>,
    online: bool,
    rx_bytes: u64,
    tx_bytes: u64,
}

impl RawNode {
    fn first_ip(&self) -> String {
        self.tailscale_ips
            .as_ref()
            .and_then(|ips| ips.first().cloned())
            .unwrap_or_default()
    }

    fn into_node_info(self) -> NodeInfo {
        NodeInfo {
            mesh_address: self.first_ip(),
            hostname: self.host_name,
            public_key: self.public_key,
            online: self.online,
        }
    }

    fn into_snapshot(self) -> PeerSnapshot {
        PeerSnapshot {
            mesh_address: self.first_ip(),
            hostname: self.host_name,
            public_key: self.public_key,
            allowed_ips: self.allowed_ips.unwrap_or_default(),
            online: self.online,
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
        }
    }
}

/// Decode `tailscale status --json` output
pub fn parse_status(raw: &[u8]) -> Result<MeshStatus> {
    let raw: RawStatus = serde_json::from_slice(raw)
        .map_err(|e| Error::MalformedOutput(format!("tailscale status: {}", e)))?;

    let backend_ok = raw
        .backend_state
        .as_deref()
        .map_or(true, |s| !LOGGED_OUT_STATES.contains(&s));
    let logged_in = raw.self_node.is_some() && backend_ok;

    let peers = raw
        .peer
        .unwrap_or_default()
        .into_values()
        .map(RawNode::into_snapshot)
        .collect();

    Ok(MeshStatus {
        logged_in,
        self_node: raw.self_node.map(RawNode::into_node_info),
        peers,
    })
}

/// Build the `tailscale up` argument list for a session
pub fn login_args(config: &SessionConfig) -> Vec<String> {
    let mut args = vec![
        "up".to_string(),
        "--authkey".to_string(),
        config.auth_key.clone(),
    ];

    if let Some(hostname) = &config.hostname {
        args.extend(["--hostname".to_string(), hostname.clone()]);
    }
    if let Some(control_url) = &config.control_url {
        args.extend(["--login-server".to_string(), control_url.clone()]);
    }
    if config.accept_routes {
        args.push("--accept-routes".to_string());
    }
    if let Some(exit_node) = &config.exit_node {
        args.extend(["--exit-node".to_string(), exit_node.clone()]);
    }

    args
}

/// Mesh provider backed by the `tailscale` CLI
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    binary: String,
}

impl Default for TailscaleCli {
    fn default() -> Self {
        Self::new()
    }
}

impl TailscaleCli {
    pub fn new() -> Self {
        Self::with_binary("tailscale")
    }

    /// Use a specific CLI binary (path or name on `PATH`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn output(&self, args: &[String]) -> Result<std::process::Output> {
        trace!("{} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::DaemonUnavailable(format!("failed to run {}: {}", self.binary, e)))
    }

    async fn status_json(&self) -> Result<Option<Vec<u8>>> {
        let output = self
            .output(&["status".to_string(), "--json".to_string()])
            .await?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            debug!("tailscale status exited with {}", output.status);
            Ok(None)
        }
    }
}

#[async_trait]
impl MeshProvider for TailscaleCli {
    async fn is_running(&self) -> bool {
        matches!(self.status_json().await, Ok(Some(_)))
    }

    async fn status(&self) -> Result<MeshStatus> {
        match self.status_json().await? {
            Some(raw) => parse_status(&raw),
            // The CLI exits non-zero when the daemon is stopped or has no session
            None => Ok(MeshStatus::logged_out()),
        }
    }

    async fn traffic(&self) -> Result<Vec<PeerSnapshot>> {
        Ok(self.status().await?.peers)
    }

    async fn login(&self, config: &SessionConfig) -> Result<()> {
        let output = self.output(&login_args(config)).await?;
        if !output.status.success() {
            return Err(Error::command_failed(&self.binary, &output));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let output = self.output(&["logout".to_string()]).await?;
        if output.status.success() {
            return Ok(());
        }
        let err = Error::command_failed(&self.binary, &output);
        if err.to_string().contains("not logged in") {
            debug!("tailscale logout: already logged out");
            return Ok(());
        }
        Err(err)
    }

    async fn version(&self) -> Result<String> {
        let output = self.output(&["version".to_string()]).await?;
        if !output.status.success() {
            return Err(Error::command_failed(&self.binary, &output));
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::MalformedOutput("empty tailscale version output".to_string()))
    }
}
