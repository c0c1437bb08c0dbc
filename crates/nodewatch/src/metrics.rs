//! Metric vocabulary committed to the prometheus exporter.
//!
//! Every observation is keyed by `(chain_name, hostname)`; block-age
//! observations additionally carry the discovered chain id, node version and
//! protocol name. Label values are snapshotted from the node identity at
//! emission time, so a refreshed chain id shows up on the next emission.

use crate::identity::NodeIdentity;
use metrics::{
    counter,
    gauge,
    histogram,
};
use metrics_exporter_prometheus::{
    BuildError,
    Matcher,
    PrometheusBuilder,
    PrometheusHandle,
};
use std::{
    sync::Arc,
    time::Duration,
};

pub const ENDPOINT_NODE_STATUS: &str = "node_status";
pub const ENDPOINT_BLOCK_RETRIEVAL: &str = "block_retrieval";

const BLOCK_DELAY_BUCKETS: &[f64] = &[
    0.1, 0.3, 0.5, 1.0, 3.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0,
];
const RESPONSE_TIME_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Build the prometheus recorder, register histogram buckets, and install it
/// as the global recorder. The returned handle renders the exposition text.
pub fn install_exporter() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("nodewatch_block_delay_histogram_seconds".to_string()),
            BLOCK_DELAY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("nodewatch_endpoint_response_time_histogram_milliseconds".to_string()),
            RESPONSE_TIME_BUCKETS,
        )?
        .install_recorder()
}

/// Per-node emission helper. Cheap to clone; label values come from the
/// shared identity at call time.
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    identity: Arc<NodeIdentity>,
}

impl NodeMetrics {
    pub fn new(identity: Arc<NodeIdentity>) -> Self {
        Self { identity }
    }

    /// One connection attempt, labeled by transport and outcome.
    pub fn record_connection_attempt(&self, connection_type: &'static str, success: bool) {
        let result = if success { "success" } else { "fail" };
        counter!(
            "nodewatch_rpc_connections_total",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
            "connection_type" => connection_type,
            "result" => result,
        )
        .increment(1);
    }

    /// 0/1 health outcome for one endpoint type.
    pub fn record_health(&self, endpoint_type: &'static str, healthy: bool) {
        gauge!(
            "nodewatch_endpoint_healthy",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
            "endpoint_type" => endpoint_type,
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Probe duration, recorded as both the current value and a histogram
    /// observation in milliseconds.
    pub fn record_response_time(&self, endpoint_type: &'static str, duration: Duration) {
        let millis = duration.as_secs_f64() * 1000.0;
        gauge!(
            "nodewatch_endpoint_response_time_milliseconds",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
            "endpoint_type" => endpoint_type,
        )
        .set(millis);
        histogram!(
            "nodewatch_endpoint_response_time_histogram_milliseconds",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
            "endpoint_type" => endpoint_type,
        )
        .record(millis);
    }

    /// Delay between block creation and local arrival, clamped at zero.
    pub fn record_block_delay(&self, delay_seconds: f64) {
        let delay_seconds = delay_seconds.max(0.0);
        gauge!(
            "nodewatch_block_delay_seconds",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
        )
        .set(delay_seconds);
        histogram!(
            "nodewatch_block_delay_histogram_seconds",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
        )
        .record(delay_seconds);
    }

    /// Reset the block-age gauge. Called on every processed block; the
    /// supervisor heartbeat advances it once per second, so the gauge reads
    /// as seconds since the last block.
    pub fn mark_block_processed(&self) {
        self.block_age_gauge().set(0.0);
    }

    /// One heartbeat second without a block.
    pub fn bump_block_age(&self) {
        self.block_age_gauge().increment(1.0);
    }

    fn block_age_gauge(&self) -> metrics::Gauge {
        gauge!(
            "nodewatch_last_block_age_seconds",
            "chain_name" => self.identity.chain_name().to_string(),
            "hostname" => self.identity.host_name().to_string(),
            "chain_id" => self.identity.chain_id(),
            "node_version" => self.identity.node_version(),
            "protocol_name" => self.identity.protocol_name().to_string(),
        )
    }
}
