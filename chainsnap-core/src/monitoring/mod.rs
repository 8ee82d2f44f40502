//! Monitoring and observability
//!
//! Prometheus counters for every outcome the feed and service loops log.
//! There is no scrape endpoint; the registry is rendered as text on demand.

pub mod metrics;

pub use metrics::{FeedMetrics, MetricsRegistry, ServiceMetrics, SnapshotMetrics};
