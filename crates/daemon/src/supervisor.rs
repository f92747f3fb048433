//! Session supervisor
//!
//! Drives the node from "config in hand" to "in the mesh":
//! ensure the daemon runs, log in if needed, then look at the result.
//! After `Ready` nothing re-enters `Authenticating`; a dropped session only
//! shows up through the status API.

use crate::launcher::DaemonLauncher;
use crate::retry::Sleeper;
use anyhow::Context;
use meshwatch_common::{Error, MeshProvider, NodeInfo, Result, SessionConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bootstrap / session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    ConfigAcquired,
    DaemonEnsuring,
    Authenticating,
    Verifying,
    Ready,
    ShuttingDown,
    Terminated,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Unconfigured
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unconfigured => write!(f, "unconfigured"),
            SessionState::ConfigAcquired => write!(f, "config_acquired"),
            SessionState::DaemonEnsuring => write!(f, "daemon_ensuring"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Verifying => write!(f, "verifying"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::ShuttingDown => write!(f, "shutting_down"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Unconfigured, ConfigAcquired)
            | (ConfigAcquired, DaemonEnsuring)
            | (DaemonEnsuring, Authenticating)
            | (Authenticating, Verifying)
            | (Verifying, Ready)
            | (ShuttingDown, Terminated) => true,
            // A termination signal can arrive at any point before the end
            (from, ShuttingDown) => !matches!(from, ShuttingDown | Terminated),
            _ => false,
        }
    }
}

/// Fixed waits after steps that take effect asynchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub daemon_start: Duration,
    pub login: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            daemon_start: Duration::from_secs(3),
            login: Duration::from_secs(5),
        }
    }
}

/// Session supervisor
pub struct Supervisor {
    provider: Arc<dyn MeshProvider>,
    launcher: DaemonLauncher,
    sleeper: Arc<dyn Sleeper>,
    delays: SettleDelays,
    state: SessionState,
    identity: Option<NodeInfo>,
}

impl Supervisor {
    pub fn new(
        provider: Arc<dyn MeshProvider>,
        launcher: DaemonLauncher,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            provider,
            launcher,
            sleeper,
            delays: SettleDelays::default(),
            state: SessionState::Unconfigured,
            identity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Self node observed during verification, if any
    #[cfg(test)]
    pub fn identity(&self) -> Option<&NodeInfo> {
        self.identity.as_ref()
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Session state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Run the bootstrap sequence to `Ready`.
    ///
    /// Errors are fatal for the process: the daemon could not be started, its
    /// status could not be read, or login failed.
    pub async fn bootstrap(&mut self, config: &SessionConfig) -> anyhow::Result<()> {
        self.transition(SessionState::ConfigAcquired)?;

        self.transition(SessionState::DaemonEnsuring)?;
        self.ensure_daemon().await?;

        self.transition(SessionState::Authenticating)?;
        self.authenticate(config).await?;

        self.transition(SessionState::Verifying)?;
        self.verify().await;

        self.transition(SessionState::Ready)?;
        info!("Mesh session ready");
        Ok(())
    }

    async fn ensure_daemon(&self) -> anyhow::Result<()> {
        if self.provider.is_running().await {
            debug!("Mesh daemon already running");
            return Ok(());
        }

        info!("Starting mesh daemon...");
        self.launcher
            .launch()
            .await
            .context("failed to start mesh daemon")?;

        self.sleeper.sleep(self.delays.daemon_start).await;
        Ok(())
    }

    async fn authenticate(&self, config: &SessionConfig) -> anyhow::Result<()> {
        let status = self
            .provider
            .status()
            .await
            .context("failed to get mesh status")?;

        if status.logged_in {
            info!("Already logged into the mesh");
            return Ok(());
        }

        info!("Logging into the mesh...");
        self.provider
            .login(config)
            .await
            .context("failed to log into the mesh")?;
        info!("Successfully logged into the mesh");

        self.sleeper.sleep(self.delays.login).await;
        Ok(())
    }

    async fn verify(&mut self) {
        match self.provider.status().await {
            Ok(status) => match status.self_node {
                Some(node) => {
                    info!(
                        "Mesh connected as {} with IP {}",
                        node.hostname, node.mesh_address
                    );
                    self.identity = Some(node);
                }
                None => warn!("Mesh status has no self node yet"),
            },
            Err(e) => warn!("Failed to verify mesh status: {}", e),
        }

        match self.provider.version().await {
            Ok(version) => info!("Mesh daemon version {}", version),
            Err(e) => debug!("Mesh daemon version unavailable: {}", e),
        }
    }

    /// Log out and terminate. Logout failure is logged, never fatal.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.transition(SessionState::ShuttingDown) {
            warn!("Ignoring shutdown request: {}", e);
            return;
        }

        info!("Logging out of the mesh");
        if let Err(e) = self.provider.logout().await {
            error!("Failed to logout from the mesh: {}", e);
        }

        if let Err(e) = self.transition(SessionState::Terminated) {
            error!("Failed to terminate session: {}", e);
        }
    }
}
