//! Relay metrics.
//!
//! Atomic counters shared between the actor system (which updates them)
//! and the diagnostics surface (which snapshots them). The same updates
//! feed the Prometheus recorder through the `metrics` macros, so `/metrics`
//! and the `/status` snapshot can never disagree on what was counted.
//! All metrics carry the `gp_` prefix.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared relay metrics.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Calls currently registered.
    active_calls: AtomicUsize,
    /// Connections currently admitted across all calls.
    active_connections: AtomicUsize,
    /// Correlated requests resolved by the media subsystem.
    requests_resolved: AtomicU64,
    /// Correlated requests that timed out or died with their connection.
    requests_abandoned: AtomicU64,
    /// Media responses that matched no pending request.
    responses_discarded: AtomicU64,
    /// Events dropped because no push channel was attached.
    events_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_created(&self) {
        self.active_calls.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("gp_active_calls").increment(1.0);
    }

    pub fn call_removed(&self) {
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("gp_active_calls").decrement(1.0);
    }

    pub fn connection_created(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("gp_active_connections").increment(1.0);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("gp_active_connections").decrement(1.0);
    }

    pub fn request_resolved(&self) {
        self.requests_resolved.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gp_requests_resolved_total").increment(1);
    }

    pub fn request_abandoned(&self) {
        self.requests_abandoned.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gp_requests_abandoned_total").increment(1);
    }

    pub fn response_discarded(&self) {
        self.responses_discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gp_responses_discarded_total").increment(1);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gp_events_dropped_total").increment(1);
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests_resolved(&self) -> u64 {
        self.requests_resolved.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests_abandoned(&self) -> u64 {
        self.requests_abandoned.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn responses_discarded(&self) -> u64 {
        self.responses_discarded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_call_and_connection_counts() {
        let metrics = RelayMetrics::new();

        assert_eq!(metrics.call_count(), 0);
        assert_eq!(metrics.connection_count(), 0);

        metrics.call_created();
        metrics.call_created();
        assert_eq!(metrics.call_count(), 2);

        metrics.connection_created();
        metrics.connection_created();
        metrics.connection_created();
        assert_eq!(metrics.connection_count(), 3);

        metrics.call_removed();
        metrics.connection_closed();
        assert_eq!(metrics.call_count(), 1);
        assert_eq!(metrics.connection_count(), 2);
    }

    #[test]
    fn test_request_outcome_counters() {
        let metrics = RelayMetrics::new();

        metrics.request_resolved();
        metrics.request_resolved();
        metrics.request_abandoned();
        metrics.response_discarded();
        metrics.event_dropped();

        assert_eq!(metrics.requests_resolved(), 2);
        assert_eq!(metrics.requests_abandoned(), 1);
        assert_eq!(metrics.responses_discarded(), 1);
        assert_eq!(metrics.events_dropped(), 1);
    }
}
