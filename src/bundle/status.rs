//! Bundle status polling
//!
//! After submission the relay needs a moment before it knows the bundle, so
//! the first poll waits for a grace period. Polls then repeat at a fixed
//! interval until the relay reports a terminal status or the timeout passes.
//! A failed poll is not terminal; the bundle is still in flight.

use super::errors::BundleError;
use super::types::{BundleOutcome, BundleStatus, InflightBundleStatus};
use crate::config::BundleStatusConfig;
use crate::metrics::metrics;
use crate::types::Deadline;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Anything that can report the relay's view of a bundle
#[async_trait]
pub trait BundleStatusSource: Send + Sync {
    async fn inflight_status(
        &self,
        bundle_id: &str,
        deadline: Deadline,
    ) -> Result<Option<InflightBundleStatus>, BundleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleStatusPoller {
    initial_delay: Duration,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for BundleStatusPoller {
    fn default() -> Self {
        Self::from_config(&BundleStatusConfig::default())
    }
}

impl BundleStatusPoller {
    pub fn new(initial_delay: Duration, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &BundleStatusConfig) -> Self {
        Self::new(config.initial_delay(), config.poll_interval(), config.timeout())
    }

    /// Poll until a terminal status, the timeout, or `deadline`, whichever
    /// comes first. Never returns `Pending`.
    #[instrument(skip(self, source, deadline))]
    pub async fn poll<S: BundleStatusSource + ?Sized>(
        &self,
        source: &S,
        bundle_id: &str,
        deadline: Deadline,
    ) -> BundleOutcome {
        let started = Instant::now();
        let stop = deadline.min(Deadline::after(self.timeout));
        let mut polls = 0u32;

        tokio::time::sleep(stop.clamp(self.initial_delay)).await;

        loop {
            if stop.is_expired() {
                metrics().bundles_timed_out_total.inc();
                warn!(polls, "Bundle status unresolved before timeout");
                return BundleOutcome {
                    bundle_id: bundle_id.to_string(),
                    status: BundleStatus::Timeout,
                    landed_slot: None,
                    polls,
                    elapsed: started.elapsed(),
                };
            }

            polls += 1;
            let (status, landed_slot) = match source.inflight_status(bundle_id, stop).await {
                Ok(Some(inflight)) => (BundleStatus::from(inflight.status), inflight.landed_slot),
                Ok(None) => (BundleStatus::Pending, None),
                Err(e) => {
                    debug!(poll = polls, error = %e, "Bundle status poll failed");
                    (BundleStatus::Pending, None)
                }
            };

            if status.is_terminal() {
                let elapsed = started.elapsed();
                match status {
                    BundleStatus::Landed => {
                        metrics().bundles_landed_total.inc();
                        metrics()
                            .bundle_landing_latency
                            .observe(elapsed.as_secs_f64());
                        info!(polls, slot = ?landed_slot, "Bundle landed");
                    }
                    _ => {
                        metrics().bundles_failed_total.inc();
                        warn!(polls, status = %status, "Bundle did not land");
                    }
                }
                return BundleOutcome {
                    bundle_id: bundle_id.to_string(),
                    status,
                    landed_slot,
                    polls,
                    elapsed,
                };
            }

            tokio::time::sleep(stop.clamp(self.poll_interval)).await;
        }
    }
}
