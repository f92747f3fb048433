//! In-memory mesh provider
//!
//! Scriptable stand-in for the mesh daemon, used by tests of the supervisor,
//! accountant and status API.

use crate::provider::MeshProvider;
use crate::types::{MeshStatus, NodeInfo, PeerSnapshot, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    running: bool,
    status: MeshStatus,
    /// Self node installed on a successful login
    login_identity: Option<NodeInfo>,
    query_error: Option<String>,
    login_error: Option<String>,
    logout_error: Option<String>,
    logins: Vec<SessionConfig>,
    logouts: usize,
}

/// Mesh provider whose state is set directly by the caller
#[derive(Debug, Clone, Default)]
pub struct MemoryMeshProvider {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryMeshProvider {
    /// A running daemon with no session
    pub fn new() -> Self {
        let provider = Self::default();
        provider.inner.lock().running = true;
        provider
    }

    /// A running daemon already logged in as `node`
    pub fn logged_in(node: NodeInfo) -> Self {
        let provider = Self::new();
        {
            let mut state = provider.inner.lock();
            state.status.logged_in = true;
            state.status.self_node = Some(node);
        }
        provider
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().running = running;
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.inner.lock().status.logged_in = logged_in;
    }

    pub fn set_self_node(&self, node: Option<NodeInfo>) {
        self.inner.lock().status.self_node = node;
    }

    pub fn set_peers(&self, peers: Vec<PeerSnapshot>) {
        self.inner.lock().status.peers = peers;
    }

    /// Identity reported as `self` once a login succeeds
    pub fn set_login_identity(&self, node: NodeInfo) {
        self.inner.lock().login_identity = Some(node);
    }

    /// Make status and traffic queries fail (`None` clears)
    pub fn fail_queries(&self, message: Option<&str>) {
        self.inner.lock().query_error = message.map(str::to_string);
    }

    pub fn fail_login(&self, message: &str) {
        self.inner.lock().login_error = Some(message.to_string());
    }

    pub fn fail_logout(&self, message: &str) {
        self.inner.lock().logout_error = Some(message.to_string());
    }

    /// Session configs passed to `login`, in call order
    pub fn logins(&self) -> Vec<SessionConfig> {
        self.inner.lock().logins.clone()
    }

    pub fn logout_count(&self) -> usize {
        self.inner.lock().logouts
    }

    fn check_query(&self) -> Result<()> {
        match &self.inner.lock().query_error {
            Some(msg) => Err(Error::DaemonUnavailable(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MeshProvider for MemoryMeshProvider {
    async fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    async fn status(&self) -> Result<MeshStatus> {
        self.check_query()?;
        Ok(self.inner.lock().status.clone())
    }

    async fn traffic(&self) -> Result<Vec<PeerSnapshot>> {
        self.check_query()?;
        Ok(self.inner.lock().status.peers.clone())
    }

    async fn login(&self, config: &SessionConfig) -> Result<()> {
        let mut state = self.inner.lock();
        state.logins.push(config.clone());
        if let Some(msg) = &state.login_error {
            return Err(Error::CommandFailed {
                program: "memory".to_string(),
                status: "exit status: 1".to_string(),
                output: msg.clone(),
            });
        }
        state.status.logged_in = true;
        if let Some(node) = state.login_identity.clone() {
            state.status.self_node = Some(node);
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.logouts += 1;
        if let Some(msg) = &state.logout_error {
            return Err(Error::Internal(msg.clone()));
        }
        state.status.logged_in = false;
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        self.check_query()?;
        Ok(format!("memory-{}", crate::VERSION))
    }
}
