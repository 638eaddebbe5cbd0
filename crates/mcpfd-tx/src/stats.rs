use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Transmit counters, updated from every pipeline context.
#[derive(Debug, Default)]
pub struct TxStats {
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_aborted_errors: AtomicU64,
    tx_errors: AtomicU64,
    tx_dropped: AtomicU64,
    tef_mismatches: AtomicU64,
    drift_warnings: AtomicU64,
    drift_alarms: AtomicU64,
}

/// Point-in-time copy of [`TxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_aborted_errors: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
    pub tef_mismatches: u64,
    pub drift_warnings: u64,
    pub drift_alarms: u64,
}

impl TxStats {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.tx_aborted_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mismatch(&self) {
        self.tef_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drift(&self, alarm: bool) {
        self.drift_warnings.fetch_add(1, Ordering::Relaxed);
        if alarm {
            self.drift_alarms.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_aborted_errors: self.tx_aborted_errors.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            tef_mismatches: self.tef_mismatches.load(Ordering::Relaxed),
            drift_warnings: self.drift_warnings.load(Ordering::Relaxed),
            drift_alarms: self.drift_alarms.load(Ordering::Relaxed),
        }
    }
}
