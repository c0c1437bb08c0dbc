//! One timed status round trip against a node endpoint.

use crate::{
    client::ClientError,
    metrics::NodeMetrics,
};
use std::{
    future::Future,
    time::{
        Duration,
        Instant,
    },
};

/// Maximum time a single probe may take before it counts as failed.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one probe operation to completion and record its outcome.
///
/// The health gauge and the response-time observations are recorded whether
/// or not the probe succeeds; a timed-out probe still contributes its
/// duration.
pub async fn timed_probe<T, F>(
    metrics: &NodeMetrics,
    endpoint_type: &'static str,
    op: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let started_at = Instant::now();
    let result = match tokio::time::timeout(PROBE_TIMEOUT, op).await {
        Ok(result) => result,
        Err(_elapsed) => Err(ClientError::Timeout),
    };
    let elapsed = started_at.elapsed();

    metrics.record_health(endpoint_type, result.is_ok());
    metrics.record_response_time(endpoint_type, elapsed);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::NodeIdentity,
        metrics::ENDPOINT_NODE_STATUS,
    };
    use metrics_util::{
        MetricKind,
        debugging::{
            DebugValue,
            DebuggingRecorder,
        },
    };
    use std::sync::Arc;

    fn node_metrics() -> NodeMetrics {
        NodeMetrics::new(Arc::new(NodeIdentity::new("story", "story-01", "cometbft", "", "")))
    }

    fn health_gauge(snapshot: Vec<(metrics_util::CompositeKey, Option<metrics::Unit>, Option<metrics::SharedString>, DebugValue)>) -> f64 {
        let (_, _, _, value) = snapshot
            .into_iter()
            .find(|(key, _, _, _)| {
                key.kind() == MetricKind::Gauge
                    && key.key().name() == "nodewatch_endpoint_healthy"
            })
            .expect("health gauge should be emitted");
        match value {
            DebugValue::Gauge(v) => v.into_inner(),
            other => panic!("expected gauge, got {other:?}"),
        }
    }

    #[test]
    fn successful_probe_records_healthy() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("create tokio runtime");
            let result = runtime.block_on(timed_probe(
                &node_metrics(),
                ENDPOINT_NODE_STATUS,
                async { Ok(42u64) },
            ));
            assert_eq!(result.expect("probe should succeed"), 42);
        });

        assert_eq!(health_gauge(snapshotter.snapshot().into_vec()), 1.0);
    }

    #[test]
    fn failed_probe_still_records_duration() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("create tokio runtime");
            let result: Result<(), _> = runtime.block_on(timed_probe(
                &node_metrics(),
                ENDPOINT_NODE_STATUS,
                async { Err(ClientError::Rpc("boom".to_string())) },
            ));
            assert!(result.is_err());
        });

        // One snapshot; it drains the recorder, so consume it in order.
        let snapshot = snapshotter.snapshot().into_vec();
        assert!(snapshot.iter().any(|(key, _, _, _)| {
            key.kind() == MetricKind::Histogram
                && key.key().name() == "nodewatch_endpoint_response_time_histogram_milliseconds"
        }));
        assert_eq!(health_gauge(snapshot), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_that_never_resolves_times_out() {
        // No recorder installed; emissions go to the no-op recorder.
        let result = timed_probe(
            &node_metrics(),
            ENDPOINT_NODE_STATUS,
            std::future::pending::<Result<(), ClientError>>(),
        )
        .await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }
}
