//! Periodic bandwidth reporting
//!
//! Each tick takes a traffic snapshot, runs an accounting cycle and pushes the
//! reports to the controller. Failures are logged; the next tick starts fresh.

use crate::accounting::BandwidthAccountant;
use crate::notifier::ChangeNotifier;
use meshwatch_common::{Error, MeshProvider, PeerBandwidthReport, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub struct Reporter {
    provider: Arc<dyn MeshProvider>,
    accountant: Arc<BandwidthAccountant>,
    notifier: ChangeNotifier,
    http: reqwest::Client,
    sink_url: Option<String>,
    interval: Duration,
}

impl Reporter {
    pub fn new(
        provider: Arc<dyn MeshProvider>,
        accountant: Arc<BandwidthAccountant>,
        notifier: ChangeNotifier,
        http: reqwest::Client,
        sink_url: Option<String>,
    ) -> Self {
        Self {
            provider,
            accountant,
            notifier,
            http,
            sink_url,
            interval: REPORT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Tick until `shutdown` is cancelled. A tick already running when the
    /// token fires is allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        match &self.sink_url {
            Some(url) => info!("Reporting peer bandwidth to {} every {:?}", url, self.interval),
            None => info!("Tracking peer changes every {:?} (no bandwidth sink)", self.interval),
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                warn!("Failed to report peer bandwidth: {}", e);
            }
        }

        info!("Reporter stopped");
    }

    /// One reporting cycle; returns the number of reports produced
    pub async fn tick(&self) -> Result<usize> {
        // No snapshot, no cache mutation
        let snapshot = self.provider.traffic().await?;

        let accrual = self.accountant.accrue(&snapshot, chrono::Utc::now());
        debug!(
            "Accounting cycle: {} reports, {} changes, {} peers tracked",
            accrual.reports.len(),
            accrual.changes.len(),
            self.accountant.tracked_peers()
        );

        self.notifier.dispatch(accrual.changes);

        if let Some(url) = &self.sink_url {
            self.push(url, &accrual.reports).await?;
        }
        Ok(accrual.reports.len())
    }

    async fn push(&self, url: &str, reports: &[PeerBandwidthReport]) -> Result<()> {
        let resp = self
            .http
            .post(url)
            .json(reports)
            .send()
            .await
            .map_err(|e| Error::Http(format!("failed to send bandwidth data: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("API returned non-OK status: {}", status)));
        }
        Ok(())
    }
}
