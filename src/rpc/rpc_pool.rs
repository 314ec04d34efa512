//! Prioritized ledger endpoint pool with failure tracking
//!
//! - Endpoints are ordered by configured priority; ties keep configuration order
//! - Each endpoint carries a CAS-updated consecutive failure counter
//! - Endpoints over the failure threshold are ranked after healthy ones but
//!   never removed, so a pool with only failing endpoints still makes progress
use super::rpc_atomics::AtomicEndpointStats;
use super::rpc_config::{RpcConfig, RpcEndpointConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One ledger access point
#[derive(Debug)]
pub struct RpcEndpoint {
    url: String,
    priority: u32,
    stats: AtomicEndpointStats,
}

impl RpcEndpoint {
    pub fn new(config: RpcEndpointConfig) -> Self {
        Self {
            url: config.url,
            priority: config.priority,
            stats: AtomicEndpointStats::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.stats.consecutive_failures()
    }
}

/// Ordered set of endpoints owned by one pipeline
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Arc<RpcEndpoint>>,
    unhealthy_threshold: u64,
}

impl EndpointPool {
    pub fn new(configs: Vec<RpcEndpointConfig>, unhealthy_threshold: u64) -> Self {
        let mut endpoints: Vec<_> = configs
            .into_iter()
            .map(|config| Arc::new(RpcEndpoint::new(config)))
            .collect();
        // Stable: equal priorities keep configuration order
        endpoints.sort_by_key(|endpoint| endpoint.priority);

        Self {
            endpoints,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(config.endpoints.clone(), config.unhealthy_threshold)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn is_healthy(&self, endpoint: &RpcEndpoint) -> bool {
        endpoint.stats.is_healthy(self.unhealthy_threshold)
    }

    pub fn healthy_count(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|endpoint| self.is_healthy(endpoint))
            .count()
    }

    /// Snapshot of endpoints in preference order: healthy ones by priority,
    /// then unhealthy ones by priority
    pub fn ordered(&self) -> Vec<Arc<RpcEndpoint>> {
        let (mut healthy, unhealthy): (Vec<_>, Vec<_>) = self
            .endpoints
            .iter()
            .cloned()
            .partition(|endpoint| self.is_healthy(endpoint));
        healthy.extend(unhealthy);
        healthy
    }

    pub fn record_success(&self, endpoint: &RpcEndpoint, latency: Duration) {
        let ended_streak = endpoint.stats.record_success();
        if ended_streak >= self.unhealthy_threshold {
            info!(
                url = %endpoint.url,
                latency_ms = latency.as_millis() as u64,
                "Endpoint recovered"
            );
        }
    }

    pub fn record_failure(&self, endpoint: &RpcEndpoint, latency: Duration) {
        let streak = endpoint.stats.record_failure();
        // Exactly one caller observes the crossing
        if streak == self.unhealthy_threshold {
            warn!(
                url = %endpoint.url,
                consecutive_failures = streak,
                latency_ms = latency.as_millis() as u64,
                "Endpoint marked unhealthy"
            );
        }
    }
}
