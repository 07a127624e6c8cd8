//! # Prometheus Metrics
//!
//! Operational metrics for the membership daemon, scraped at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] so they do not
//! collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the node's metrics.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Holds all Prometheus metric handles for the node.
pub struct NodeMetrics {
    /// Registry that owns all metrics below.
    registry: Registry,
    /// Current number of members in the local group view (including self).
    pub group_size: IntGauge,
    /// Membership events observed locally, labeled by kind
    /// (joined/left/died/moved).
    pub membership_events_total: IntCounterVec,
    /// Metadata updates observed locally.
    pub metadata_updates_total: IntCounterVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("roster".into()), None)
            .expect("failed to create prometheus registry");

        let group_size = IntGauge::new(
            "group_size",
            "Current number of members in the local group view",
        )
        .expect("metric creation");
        registry
            .register(Box::new(group_size.clone()))
            .expect("metric registration");

        let membership_events_total = IntCounterVec::new(
            Opts::new(
                "membership_events_total",
                "Membership events observed locally, by kind",
            ),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(membership_events_total.clone()))
            .expect("metric registration");

        let metadata_updates_total = IntCounterVec::new(
            Opts::new(
                "metadata_updates_total",
                "Metadata updates observed locally, by key",
            ),
            &["key"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(metadata_updates_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            group_size,
            membership_events_total,
            metadata_updates_total,
        }
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .expect("metrics encode");
        String::from_utf8(buffer).expect("metrics are UTF-8")
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum handler for `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    (StatusCode::OK, metrics.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_render() {
        let metrics = NodeMetrics::new();
        metrics.group_size.set(5);
        metrics
            .membership_events_total
            .with_label_values(&["died"])
            .inc();

        let rendered = metrics.render();
        assert!(rendered.contains("roster_group_size 5"));
        assert!(rendered.contains("roster_membership_events_total"));
        assert!(rendered.contains("kind=\"died\""));
    }

    #[test]
    fn registries_are_independent() {
        // Two instances must not clash — no global registry involved.
        let a = NodeMetrics::new();
        let b = NodeMetrics::new();
        a.group_size.set(1);
        b.group_size.set(2);
        assert!(a.render().contains("roster_group_size 1"));
        assert!(b.render().contains("roster_group_size 2"));
    }
}
