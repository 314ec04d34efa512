//! Process-wide prometheus metrics for submissions, confirmations and bundles

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Pipeline metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub submission_attempts_total: IntCounter,
    pub submission_failures_total: IntCounter,
    pub relay_rate_limited_total: IntCounter,
    pub bundles_submitted_total: IntCounter,
    pub bundles_landed_total: IntCounter,
    pub bundles_failed_total: IntCounter,
    pub bundles_timed_out_total: IntCounter,
    pub confirmation_timeouts_total: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
    pub bundle_landing_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submission_attempts_total = IntCounter::with_opts(Opts::new(
            "submission_attempts_total",
            "sendTransaction calls, counting strict and relaxed phases separately",
        ))?;

        let submission_failures_total = IntCounter::with_opts(Opts::new(
            "submission_failures_total",
            "Submissions that ended without an accepted signature",
        ))?;

        let relay_rate_limited_total = IntCounter::with_opts(Opts::new(
            "relay_rate_limited_total",
            "Relay responses with HTTP 429",
        ))?;

        let bundles_submitted_total = IntCounter::with_opts(Opts::new(
            "bundles_submitted_total",
            "Bundles accepted by a relay",
        ))?;

        let bundles_landed_total =
            IntCounter::with_opts(Opts::new("bundles_landed_total", "Bundles that landed"))?;

        let bundles_failed_total = IntCounter::with_opts(Opts::new(
            "bundles_failed_total",
            "Bundles reported failed or invalid",
        ))?;

        let bundles_timed_out_total = IntCounter::with_opts(Opts::new(
            "bundles_timed_out_total",
            "Bundles without a terminal status before the poll timeout",
        ))?;

        let confirmation_timeouts_total = IntCounter::with_opts(Opts::new(
            "confirmation_timeouts_total",
            "Signatures that did not reach the target commitment in time",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to target commitment",
            )
            .buckets(vec![0.4, 0.8, 1.5, 3.0, 6.0, 12.0, 30.0, 60.0]),
        )?;

        let bundle_landing_latency = Histogram::with_opts(
            HistogramOpts::new(
                "bundle_landing_latency_seconds",
                "Time from sendBundle to a Landed status",
            )
            .buckets(vec![1.0, 2.0, 5.0, 8.0, 12.0, 20.0, 30.0]),
        )?;

        registry.register(Box::new(submission_attempts_total.clone()))?;
        registry.register(Box::new(submission_failures_total.clone()))?;
        registry.register(Box::new(relay_rate_limited_total.clone()))?;
        registry.register(Box::new(bundles_submitted_total.clone()))?;
        registry.register(Box::new(bundles_landed_total.clone()))?;
        registry.register(Box::new(bundles_failed_total.clone()))?;
        registry.register(Box::new(bundles_timed_out_total.clone()))?;
        registry.register(Box::new(confirmation_timeouts_total.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(bundle_landing_latency.clone()))?;

        Ok(Self {
            registry,
            submission_attempts_total,
            submission_failures_total,
            relay_rate_limited_total,
            bundles_submitted_total,
            bundles_landed_total,
            bundles_failed_total,
            bundles_timed_out_total,
            confirmation_timeouts_total,
            confirmation_latency,
            bundle_landing_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the prometheus text exposition format
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(|| {
        // Registration only fails on duplicate names, which are fixed above
        Metrics::new().unwrap_or_else(|e| panic!("metrics registry: {}", e))
    });
    &METRICS
}
