use std::sync::atomic::{AtomicU64, Ordering};

/// Consecutive failure counter for one ledger endpoint.
///
/// Updated with compare-and-swap so concurrent submissions never lose an
/// increment or a reset.
#[derive(Debug, Default)]
pub struct AtomicEndpointStats {
    consecutive_failures: AtomicU64,
}

impl AtomicEndpointStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request; returns the failure streak it ended
    pub fn record_success(&self) -> u64 {
        self.consecutive_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |_| Some(0))
            .unwrap_or(0)
    }

    /// Record a failed request; returns the new failure streak
    pub fn record_failure(&self) -> u64 {
        let previous = self
            .consecutive_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(1))
            })
            .unwrap_or(u64::MAX - 1);
        previous.saturating_add(1)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self, unhealthy_threshold: u64) -> bool {
        self.consecutive_failures() < unhealthy_threshold
    }
}
