//! Dispatch telemetry: counters across all sessions of one engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every session task of a [`crate::DispatchEngine`].
///
/// Plain relaxed atomics; consumers read via [`DispatchTelemetry::snapshot`].
#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    pub sessions_started: AtomicU64,
    pub sessions_accepted: AtomicU64,
    pub sessions_cancelled: AtomicU64,
    pub sessions_exhausted: AtomicU64,
    pub offers_made: AtomicU64,
    pub discovery_retries: AtomicU64,
    pub store_retries: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub sessions_started: u64,
    pub sessions_accepted: u64,
    pub sessions_cancelled: u64,
    pub sessions_exhausted: u64,
    pub offers_made: u64,
    pub discovery_retries: u64,
    pub store_retries: u64,
}

impl DispatchTelemetry {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            sessions_exhausted: self.sessions_exhausted.load(Ordering::Relaxed),
            offers_made: self.offers_made.load(Ordering::Relaxed),
            discovery_retries: self.discovery_retries.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
