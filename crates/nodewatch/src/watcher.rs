//! Per-node resilience state machine.
//!
//! A watcher owns one protocol client and drives the connect → probe →
//! subscribe → consume cycle indefinitely. Every failure path lands back in
//! a disconnected state and the periodic tick retries; there is no retry
//! cutoff. The watcher exits only when the shared cancellation token fires.

use crate::{
    client::{
        BlockEvent,
        BlockHeader,
        BlockStream,
        ClientError,
        NodeClient,
    },
    config::DEFAULT_CHECK_INTERVAL,
    identity::NodeIdentity,
    metrics::NodeMetrics,
    probe::timed_probe,
};
use rand::Rng;
use std::{
    sync::Arc,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    trace,
    warn,
};

/// Cap on a single connect, status, or subscribe call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle of a single watcher. Drives control flow only; the
/// outside world observes transitions through the emitted metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
}

pub struct Watcher<C> {
    identity: Arc<NodeIdentity>,
    metrics: NodeMetrics,
    client: C,
    check_interval: Duration,
    jitter: Option<Duration>,
    cancel: CancellationToken,
    state: ConnectionState,
    stream: Option<BlockStream>,
}

impl<C: NodeClient> Watcher<C> {
    pub fn new(
        identity: Arc<NodeIdentity>,
        client: C,
        check_interval: Duration,
        jitter: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let check_interval = if check_interval.is_zero() {
            DEFAULT_CHECK_INTERVAL
        } else {
            check_interval
        };
        Self {
            metrics: NodeMetrics::new(identity.clone()),
            identity,
            client,
            check_interval,
            jitter,
            cancel,
            state: ConnectionState::Disconnected,
            stream: None,
        }
    }

    pub fn identity(&self) -> Arc<NodeIdentity> {
        self.identity.clone()
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run the watch loop until the cancellation token fires.
    ///
    /// The loop blocks on four event sources at once: cancellation, the
    /// block subscription, the periodic tick, and (implicitly) subscription
    /// death, which shows up as an error event or the stream closing.
    pub async fn run(mut self) {
        info!(
            hostname = %self.identity.host_name(),
            chain_name = %self.identity.chain_name(),
            "Starting watcher"
        );

        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.ensure_subscription().await;

        loop {
            // The stream is moved into a local so the select arms can borrow
            // it independently of the rest of the watcher.
            let mut stream = self.stream.take();
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(hostname = %self.identity.host_name(), "Stop signal received, watcher exiting");
                    drop(stream);
                    self.teardown().await;
                    return;
                }
                event = next_block(&mut stream) => {
                    match event {
                        Some(Ok(header)) => {
                            self.stream = stream;
                            self.handle_block(header).await;
                        }
                        Some(Err(err)) => {
                            warn!(
                                hostname = %self.identity.host_name(),
                                error = %err,
                                "Subscription error, reconnecting"
                            );
                            drop(stream);
                            self.state = ConnectionState::Degraded;
                            self.ensure_subscription().await;
                        }
                        None => {
                            warn!(
                                hostname = %self.identity.host_name(),
                                "Subscription closed, reconnecting"
                            );
                            drop(stream);
                            self.state = ConnectionState::Degraded;
                            self.ensure_subscription().await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.stream = stream;
                    self.tick().await;
                }
            }
        }
    }

    /// Periodic health pass. A healthy, subscribed watcher does nothing
    /// here; a probes-only node gets its scheduled probe; anything else
    /// attempts to rebuild the connection.
    async fn tick(&mut self) {
        if self.client.is_connected() {
            if self.stream.is_some() {
                trace!(
                    hostname = %self.identity.host_name(),
                    chain_name = %self.identity.chain_name(),
                    "Connection normal"
                );
                return;
            }
            if !self.client.supports_subscriptions() {
                let _ = timed_probe(
                    &self.metrics,
                    self.client.probe_endpoint(),
                    self.client.probe(),
                )
                .await;
                return;
            }
        }

        self.apply_jitter().await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.ensure_subscription().await;
    }

    /// Drive the client toward an active subscription: connect if needed,
    /// probe once, subscribe. Any stage failing releases what was acquired
    /// and leaves the watcher disconnected until the next tick. Every stage
    /// is raced against cancellation and bounded by the dial timeout, so a
    /// blackholed endpoint can neither wedge shutdown nor starve retries.
    async fn ensure_subscription(&mut self) {
        if self.stream.is_some() && self.client.is_connected() {
            return;
        }

        // Release the stale subscription before acquiring a replacement.
        self.stream = None;
        self.state = ConnectionState::Connecting;
        let cancel = self.cancel.clone();

        if !self.client.is_connected() {
            self.client.disconnect().await;
            match bounded(&cancel, self.client.connect()).await {
                Some(Ok(())) => {
                    if self.client.dials_on_connect() {
                        self.metrics
                            .record_connection_attempt(self.client.connection_kind(), true);
                    }
                }
                Some(Err(err)) => {
                    self.metrics
                        .record_connection_attempt(self.client.connection_kind(), false);
                    error!(
                        hostname = %self.identity.host_name(),
                        error = %err,
                        "Connect failed"
                    );
                    self.state = ConnectionState::Disconnected;
                    return;
                }
                None => {
                    self.state = ConnectionState::Disconnected;
                    return;
                }
            }
        }

        // Probe once right after connecting; success refreshes the identity.
        match bounded(&cancel, self.client.status()).await {
            Some(Ok(status)) => {
                self.metrics
                    .record_connection_attempt(self.client.status_kind(), true);
                self.identity.record_status(&status);
                debug!(
                    hostname = %self.identity.host_name(),
                    chain_id = %self.identity.chain_id(),
                    node_version = %self.identity.node_version(),
                    "Node status refreshed"
                );
            }
            Some(Err(err)) => {
                self.metrics
                    .record_connection_attempt(self.client.status_kind(), false);
                warn!(
                    hostname = %self.identity.host_name(),
                    error = %err,
                    "Status check failed, dropping connection"
                );
                self.client.disconnect().await;
                self.state = ConnectionState::Disconnected;
                return;
            }
            None => {
                self.state = ConnectionState::Disconnected;
                return;
            }
        }

        if !self.client.supports_subscriptions() {
            // Probes-only node; the connection stays up and each tick runs
            // a health probe instead of consuming a block stream.
            self.state = ConnectionState::Degraded;
            debug!(
                hostname = %self.identity.host_name(),
                "No websocket endpoint configured, monitoring by probes only"
            );
            return;
        }

        match bounded(&cancel, self.client.subscribe_new_blocks()).await {
            Some(Ok(stream)) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Subscribed;
                debug!(hostname = %self.identity.host_name(), "Subscribed to new block headers");
            }
            Some(Err(err)) => {
                error!(
                    hostname = %self.identity.host_name(),
                    error = %err,
                    "Subscribe failed"
                );
                self.client.disconnect().await;
                self.state = ConnectionState::Disconnected;
            }
            None => {
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    async fn handle_block(&mut self, header: BlockHeader) {
        self.metrics.mark_block_processed();

        let arrival = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let delay_seconds = (arrival - header.timestamp as i64) as f64;
        self.metrics.record_block_delay(delay_seconds);

        debug!(
            hostname = %self.identity.host_name(),
            height = header.height,
            delay_seconds,
            "New block"
        );

        // Light re-probe after each block; a failure here only affects the
        // health metrics, not the subscription.
        let _ = timed_probe(
            &self.metrics,
            self.client.probe_endpoint(),
            self.client.probe(),
        )
        .await;
    }

    /// Spread tick-driven reconnects with a uniform random delay, scoped to
    /// the cancellation token so shutdown is never delayed by it.
    async fn apply_jitter(&self) {
        let Some(jitter) = self.jitter else {
            return;
        };
        let millis = jitter.as_millis() as u64;
        if millis == 0 {
            return;
        }
        let delay = Duration::from_millis(rand::rng().random_range(0..millis));
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    async fn teardown(&mut self) {
        self.stream = None;
        self.client.disconnect().await;
        self.state = ConnectionState::Disconnected;
    }

    #[cfg(test)]
    fn state(&self) -> ConnectionState {
        self.state
    }
}

async fn next_block(stream: &mut Option<BlockStream>) -> Option<BlockEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Bound one connection-stage call by the stop signal and the dial timeout.
/// `None` means the watcher was cancelled mid-call.
async fn bounded<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, ClientError>>,
) -> Option<Result<T, ClientError>> {
    tokio::select! {
        () = cancel.cancelled() => None,
        result = tokio::time::timeout(CONNECT_TIMEOUT, fut) => {
            Some(result.unwrap_or(Err(ClientError::Timeout)))
        }
    }
}
