//! Per-peer bandwidth accounting
//!
//! Turns cumulative daemon counters into per-cycle deltas. The reading cache
//! is private to [`BandwidthAccountant`]; callers only see the reports and the
//! membership changes each cycle produces.
//!
//! Known limitation: when a counter goes backwards (daemon restart) the
//! current absolute value is reported as the delta. That only approximates a
//! single reset and does not recover traffic across a real 64-bit wraparound
//! or several restarts between cycles. Existing consumers depend on this
//! behaviour, so it is kept as is.

use chrono::{DateTime, Utc};
use meshwatch_common::{PeerAction, PeerBandwidthReport, PeerChange, PeerSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const BYTES_PER_MB: f64 = 1_048_576.0;

/// Last counters seen for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerReading {
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
    pub observed_at: DateTime<Utc>,
}

impl PeerReading {
    fn from_snapshot(peer: &PeerSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            bytes_received: peer.rx_bytes,
            bytes_transmitted: peer.tx_bytes,
            observed_at: now,
        }
    }
}

/// Result of one accounting cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accrual {
    pub reports: Vec<PeerBandwidthReport>,
    /// Peers baselined (`Add`) or pruned (`Remove`) this cycle
    pub changes: Vec<PeerChange>,
}

/// Counter difference; a counter that went backwards reports its current value
fn counter_delta(current: u64, prior: u64) -> u64 {
    current.checked_sub(prior).unwrap_or(current)
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Owns the per-peer reading cache
#[derive(Debug, Default)]
pub struct BandwidthAccountant {
    readings: Mutex<HashMap<String, PeerReading>>,
}

impl BandwidthAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers with a cached reading
    pub fn tracked_peers(&self) -> usize {
        self.readings.lock().len()
    }

    #[cfg(test)]
    fn reading(&self, public_key: &str) -> Option<PeerReading> {
        self.readings.lock().get(public_key).copied()
    }

    /// Run one accounting cycle over a full peer snapshot.
    ///
    /// Delta computation, cache update and pruning happen under one lock, so
    /// concurrent cycles are serialized.
    pub fn accrue(&self, snapshot: &[PeerSnapshot], now: DateTime<Utc>) -> Accrual {
        let mut readings = self.readings.lock();
        let mut accrual = Accrual::default();

        for peer in snapshot {
            let current = PeerReading::from_snapshot(peer, now);

            let report = match readings.get(&peer.public_key) {
                Some(prior) => PeerBandwidthReport {
                    public_key: peer.public_key.clone(),
                    bytes_in_mb: to_mb(counter_delta(current.bytes_received, prior.bytes_received)),
                    bytes_out_mb: to_mb(counter_delta(
                        current.bytes_transmitted,
                        prior.bytes_transmitted,
                    )),
                },
                None => {
                    debug!("Baselining peer {}", peer.public_key);
                    accrual.changes.push(PeerChange {
                        action: PeerAction::Add,
                        public_key: peer.public_key.clone(),
                    });
                    PeerBandwidthReport {
                        public_key: peer.public_key.clone(),
                        bytes_in_mb: 0.0,
                        bytes_out_mb: 0.0,
                    }
                }
            };

            accrual.reports.push(report);
            readings.insert(peer.public_key.clone(), current);
        }

        let present: HashSet<&str> = snapshot.iter().map(|p| p.public_key.as_str()).collect();
        let mut gone: Vec<String> = readings
            .keys()
            .filter(|key| !present.contains(key.as_str()))
            .cloned()
            .collect();
        gone.sort();

        for public_key in gone {
            debug!("Pruning peer {}", public_key);
            readings.remove(&public_key);
            accrual.changes.push(PeerChange {
                action: PeerAction::Remove,
                public_key,
            });
        }

        accrual
    }
}
