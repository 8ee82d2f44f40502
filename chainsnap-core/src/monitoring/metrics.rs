//! Prometheus metrics for the republisher
//!
//! Three families:
//! - Feed (updates, failures by code, discovery, truncation, detached updates)
//! - Snapshot (publications, trigger captures, scan passes, window state)
//! - Service (requests by outcome, parts sent, request failures)

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::debug;

const NAMESPACE: &str = "chainsnap";

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    feed: Arc<FeedMetrics>,
    snapshot: Arc<SnapshotMetrics>,
    service: Arc<ServiceMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let feed = Arc::new(FeedMetrics::new(&registry)?);
        let snapshot = Arc::new(SnapshotMetrics::new(&registry)?);
        let service = Arc::new(ServiceMetrics::new(&registry)?);

        debug!("metrics registry initialized");

        Ok(Self {
            registry,
            feed,
            snapshot,
            service,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn feed(&self) -> &FeedMetrics {
        &self.feed
    }

    pub fn snapshot(&self) -> &SnapshotMetrics {
        &self.snapshot
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service
    }

    /// Render every family in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for MetricsRegistry {
    #[allow(clippy::panic)]
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("FATAL: Failed to create metrics registry: {}", e);
            panic!("Critical: Cannot create metrics registry")
        })
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let c = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

/// Upstream processing metrics
pub struct FeedMetrics {
    /// Updates processed successfully
    pub updates_total: IntCounter,
    /// Updates aborted, by error code
    pub update_failures_total: IntCounterVec,
    /// Links appended to a chain
    pub links_discovered_total: IntCounter,
    /// Chain truncations that removed at least one link
    pub truncations_total: IntCounter,
    /// Updates for links no longer part of their chain
    pub detached_updates_total: IntCounter,
    /// Failed upstream subscriptions
    pub registration_failures_total: IntCounter,
    /// Links currently attached to a chain
    pub links_active: IntGauge,
    /// Update processing time in microseconds
    pub update_latency_us: Histogram,
}

impl FeedMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let update_latency_us = Histogram::with_opts(
            HistogramOpts::new(
                "feed_update_latency_us",
                "Update processing time in microseconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0]),
        )?;
        registry.register(Box::new(update_latency_us.clone()))?;

        Ok(Self {
            updates_total: counter(registry, "feed_updates_total", "Updates processed")?,
            update_failures_total: counter_vec(
                registry,
                "feed_update_failures_total",
                "Updates aborted by error code",
                &["code"],
            )?,
            links_discovered_total: counter(
                registry,
                "feed_links_discovered_total",
                "Links appended to a chain",
            )?,
            truncations_total: counter(
                registry,
                "feed_truncations_total",
                "Chain truncations that removed links",
            )?,
            detached_updates_total: counter(
                registry,
                "feed_detached_updates_total",
                "Updates ignored because the link left its chain",
            )?,
            registration_failures_total: counter(
                registry,
                "feed_registration_failures_total",
                "Failed upstream subscriptions",
            )?,
            links_active: gauge(registry, "feed_links_active", "Links attached to a chain")?,
            update_latency_us,
        })
    }
}

/// Snapshot publication metrics
pub struct SnapshotMetrics {
    /// Snapshot handles published by the chain builder
    pub publications_total: IntCounter,
    /// Snapshots captured by the trigger scan
    pub trigger_captures_total: IntCounter,
    /// Scan passes run
    pub scans_total: IntCounter,
    /// 1 once the snapshot window has opened
    pub window_open: IntGauge,
}

impl SnapshotMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            publications_total: counter(
                registry,
                "snapshot_publications_total",
                "Snapshot handles published on update",
            )?,
            trigger_captures_total: counter(
                registry,
                "snapshot_trigger_captures_total",
                "Snapshots captured by the trigger scan",
            )?,
            scans_total: counter(registry, "snapshot_scans_total", "Trigger scan passes")?,
            window_open: gauge(
                registry,
                "snapshot_window_open",
                "Whether the snapshot window is open",
            )?,
        })
    }
}

/// Downstream servicing metrics
pub struct ServiceMetrics {
    /// Requests by outcome
    pub requests_total: IntCounterVec,
    /// Response parts sent
    pub parts_sent_total: IntCounter,
    /// Requests that failed with an error, by code
    pub request_failures_total: IntCounterVec,
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            requests_total: counter_vec(
                registry,
                "service_requests_total",
                "Requests by outcome",
                &["outcome"],
            )?,
            parts_sent_total: counter(registry, "service_parts_sent_total", "Parts sent")?,
            request_failures_total: counter_vec(
                registry,
                "service_request_failures_total",
                "Requests failed by error code",
                &["code"],
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new().unwrap();
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn test_render_contains_namespace() {
        let registry = MetricsRegistry::new().unwrap();
        registry.feed().updates_total.inc();
        registry
            .service()
            .requests_total
            .with_label_values(&["not_found"])
            .inc();

        let text = registry.render().unwrap();
        assert!(text.contains("chainsnap_feed_updates_total 1"));
        assert!(text.contains("outcome=\"not_found\""));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.snapshot().trigger_captures_total.inc();
        assert_eq!(b.snapshot().trigger_captures_total.get(), 0);
    }
}
