//! Mesh daemon startup
//!
//! Tries an ordered list of ways to get the mesh daemon running and stops at
//! the first one that launches.

use meshwatch_common::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How a strategy's command counts as launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Launched once the process is spawned; it keeps running detached
    Spawn,
    /// Launched once the command exits successfully
    Run,
}

/// One way of starting the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartStrategy {
    pub program: String,
    pub args: Vec<String>,
    pub mode: LaunchMode,
}

impl StartStrategy {
    pub fn new(program: &str, args: &[&str], mode: LaunchMode) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            mode,
        }
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    async fn attempt(&self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());

        match self.mode {
            LaunchMode::Spawn => {
                let child = cmd
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| Error::DaemonUnavailable(format!("{}: {}", self.describe(), e)))?;
                info!("{} started with PID {:?}", self.program, child.id());
                // Dropping the handle leaves the process running
                drop(child);
                Ok(())
            }
            LaunchMode::Run => {
                let output = cmd
                    .output()
                    .await
                    .map_err(|e| Error::DaemonUnavailable(format!("{}: {}", self.describe(), e)))?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(Error::command_failed(&self.program, &output))
                }
            }
        }
    }
}

/// Ordered list of start strategies
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    strategies: Vec<StartStrategy>,
}

impl Default for DaemonLauncher {
    fn default() -> Self {
        Self::tailscale()
    }
}

impl DaemonLauncher {
    pub fn new(strategies: Vec<StartStrategy>) -> Self {
        Self { strategies }
    }

    /// Direct `tailscaled`, then systemd, then SysV `service`
    pub fn tailscale() -> Self {
        Self::new(vec![
            StartStrategy::new(
                "tailscaled",
                &[
                    "--state=/var/lib/tailscale/tailscaled.state",
                    "--socket=/var/run/tailscale/tailscaled.sock",
                ],
                LaunchMode::Spawn,
            ),
            StartStrategy::new("systemctl", &["start", "tailscaled"], LaunchMode::Run),
            StartStrategy::new("service", &["tailscaled", "start"], LaunchMode::Run),
        ])
    }

    #[cfg(test)]
    pub fn strategies(&self) -> &[StartStrategy] {
        &self.strategies
    }

    /// Try each strategy in order; returns the one that launched
    pub async fn launch(&self) -> Result<&StartStrategy> {
        let mut last = String::from("no start strategies configured");

        for strategy in &self.strategies {
            debug!("Trying to start mesh daemon via `{}`", strategy.describe());
            match strategy.attempt().await {
                Ok(()) => {
                    info!("Mesh daemon launched via `{}`", strategy.describe());
                    return Ok(strategy);
                }
                Err(e) => {
                    warn!("Start via `{}` failed: {}", strategy.describe(), e);
                    last = e.to_string();
                }
            }
        }

        Err(Error::LaunchExhausted {
            attempts: self.strategies.len(),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tailscale_strategy_order() {
        let launcher = DaemonLauncher::tailscale();
        let programs: Vec<&str> = launcher
            .strategies()
            .iter()
            .map(|s| s.program.as_str())
            .collect();
        assert_eq!(programs, vec!["tailscaled", "systemctl", "service"]);
        assert_eq!(launcher.strategies()[0].mode, LaunchMode::Spawn);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_strategy() {
        let launcher = DaemonLauncher::new(vec![
            StartStrategy::new("/nonexistent/meshwatch-daemon", &[], LaunchMode::Spawn),
            StartStrategy::new("false", &[], LaunchMode::Run),
            StartStrategy::new("true", &[], LaunchMode::Run),
        ]);

        let used = launcher.launch().await.unwrap();
        assert_eq!(used.program, "true");
    }

    #[tokio::test]
    async fn test_spawn_counts_as_launched() {
        let launcher = DaemonLauncher::new(vec![
            StartStrategy::new("true", &[], LaunchMode::Spawn),
            StartStrategy::new("false", &[], LaunchMode::Run),
        ]);

        let used = launcher.launch().await.unwrap();
        assert_eq!(used.mode, LaunchMode::Spawn);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let launcher = DaemonLauncher::new(vec![
            StartStrategy::new("false", &[], LaunchMode::Run),
            StartStrategy::new("/nonexistent/meshwatch-daemon", &[], LaunchMode::Run),
        ]);

        let err = launcher.launch().await.unwrap_err();
        match err {
            Error::LaunchExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("Expected LaunchExhausted, got {:?}", other),
        }
    }
}
