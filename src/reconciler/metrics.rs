use crate::authority::ActionError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for actions driven by the reconciler
#[derive(Default)]
pub struct ActionMetrics {
    started: AtomicU64,
    confirmed: AtomicU64,
    /// Actions whose speculation was undone; excludes `invalid`
    rolled_back: AtomicU64,
    /// Rollbacks broken down by cause
    rejected: AtomicU64,
    timed_out: AtomicU64,
    transport_failures: AtomicU64,
    /// Refused locally before anything was speculated
    invalid: AtomicU64,
    in_flight: AtomicU64,
}

impl ActionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, error: &ActionError) {
        let counter = match error {
            ActionError::SubmissionRejected(_) => &self.rejected,
            ActionError::FinalityTimeout(_) => &self.timed_out,
            ActionError::TransportError(_) => &self.transport_failures,
            ActionError::InvalidAction(_) => {
                self.invalid.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Actions started but not yet done
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

/// Snapshot of action metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub started: u64,
    pub confirmed: u64,
    pub rolled_back: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub transport_failures: u64,
    pub invalid: u64,
    pub in_flight: u64,
}

/// Decrements the in-flight gauge when an action future completes or is dropped
pub(crate) struct InFlight<'a>(&'a ActionMetrics);

impl<'a> InFlight<'a> {
    pub(crate) fn start(metrics: &'a ActionMetrics) -> Self {
        metrics.record_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.record_finished();
    }
}
