//! Observability infrastructure for the cloud provider
//!
//! Provides:
//! - Prometheus metrics (cloud request latency by endpoint and status, registry sizes)
//! - Structured JSON logging of node-group lifecycle events with tracing

use prometheus::{register_histogram_vec, register_int_gauge, HistogramVec, IntGauge};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, warn};

/// Histogram buckets for cloud request latency (in seconds)
const REQUEST_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CloudMetricsInner> = OnceLock::new();

struct CloudMetricsInner {
    request_duration_seconds: HistogramVec,
    node_groups_registered: IntGauge,
    index_instances: IntGauge,
    index_negative_entries: IntGauge,
}

impl CloudMetricsInner {
    fn new() -> Self {
        Self {
            request_duration_seconds: register_histogram_vec!(
                "cluster_autoscaler_cloud_request_duration_seconds",
                "Time taken by cloud requests, by endpoint and status",
                &["endpoint", "status"],
                REQUEST_BUCKETS.to_vec()
            )
            .expect("Failed to register request_duration_seconds"),

            node_groups_registered: register_int_gauge!(
                "cluster_autoscaler_cloud_node_groups_registered",
                "Number of node groups currently registered"
            )
            .expect("Failed to register node_groups_registered"),

            index_instances: register_int_gauge!(
                "cluster_autoscaler_cloud_index_instances",
                "Instances known to the instance-to-group index"
            )
            .expect("Failed to register index_instances"),

            index_negative_entries: register_int_gauge!(
                "cluster_autoscaler_cloud_index_negative_entries",
                "Instances cached as belonging to no registered group"
            )
            .expect("Failed to register index_negative_entries"),
        }
    }
}

/// Cloud provider metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct CloudMetrics {
    _private: (),
}

impl Default for CloudMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CloudMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CloudMetricsInner {
        GLOBAL_METRICS.get_or_init(CloudMetricsInner::new)
    }

    /// Record how long a cloud call took
    pub fn observe_request(&self, endpoint: &str, status: &str, start: Instant) {
        self.inner()
            .request_duration_seconds
            .with_label_values(&[endpoint, status])
            .observe(start.elapsed().as_secs_f64());
    }

    pub fn request_count(&self, endpoint: &str, status: &str) -> u64 {
        self.inner()
            .request_duration_seconds
            .with_label_values(&[endpoint, status])
            .get_sample_count()
    }

    pub fn set_node_groups(&self, count: usize) {
        self.inner().node_groups_registered.set(count as i64);
    }

    pub fn set_index_sizes(&self, instances: usize, negative: usize) {
        self.inner().index_instances.set(instances as i64);
        self.inner().index_negative_entries.set(negative as i64);
    }
}

/// Structured logger for node-group lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    provider: String,
}

impl StructuredLogger {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    pub fn log_startup(&self, version: &str, node_groups: usize, auto_discovery: bool) {
        info!(
            event = "provider_started",
            provider = %self.provider,
            version = %version,
            node_groups = node_groups,
            auto_discovery = auto_discovery,
            "Cloud provider started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "provider_shutdown",
            provider = %self.provider,
            reason = %reason,
            "Cloud provider shutting down"
        );
    }

    pub fn log_group_registered(&self, group: &str, min_size: i64, max_size: i64) {
        info!(
            event = "node_group_registered",
            provider = %self.provider,
            group = %group,
            min_size = min_size,
            max_size = max_size,
            "Registered node group"
        );
    }

    pub fn log_group_unregistered(&self, group: &str) {
        info!(
            event = "node_group_unregistered",
            provider = %self.provider,
            group = %group,
            "Unregistered node group"
        );
    }

    pub fn log_resize(&self, group: &str, from: i64, to: i64) {
        info!(
            event = "node_group_resized",
            provider = %self.provider,
            group = %group,
            from = from,
            to = to,
            "Setting node group desired capacity"
        );
    }

    pub fn log_instances_terminated(&self, group: &str, instances: &[String], placeholders: usize) {
        info!(
            event = "instances_terminated",
            provider = %self.provider,
            group = %group,
            instances = ?instances,
            placeholders = placeholders,
            "Terminated instances"
        );
    }

    pub fn log_delete_rejected(&self, group: &str, size: i64, requested: usize, min_size: i64) {
        info!(
            event = "delete_rejected",
            provider = %self.provider,
            group = %group,
            size = size,
            requested = requested,
            min_size = min_size,
            "Delete batch would shrink node group below its minimum"
        );
    }

    pub fn log_index_regenerated(&self, instances: usize, groups: usize, success: bool) {
        if success {
            info!(
                event = "index_regenerated",
                provider = %self.provider,
                instances = instances,
                groups = groups,
                "Regenerated instance-to-group index"
            );
        } else {
            warn!(
                event = "index_regeneration_failed",
                provider = %self.provider,
                groups = groups,
                "Instance index regeneration failed, keeping previous mapping"
            );
        }
    }
}
