//! Fleet lifecycle management.
//!
//! The supervisor turns a parsed configuration into one watcher task per
//! node, plus a single heartbeat task that advances every node's block-age
//! gauge once per second. Watcher tasks run inside a panic boundary so one
//! faulty node can never take down the fleet. Shutdown is cooperative and
//! bounded: cancel, then wait up to the stop timeout for tasks to drain.

use crate::{
    client::{
        CometbftClient,
        EvmClient,
    },
    config::MonitorConfig,
    identity::NodeIdentity,
    metrics::NodeMetrics,
    watcher::Watcher,
};
use futures::FutureExt;
use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    warn,
};

/// Default bound on how long [`Supervisor::stop`] waits for watcher tasks.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no valid node entries in configuration")]
    NoValidNodes,
}

/// Point-in-time counts for logging and the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub total_nodes: usize,
    pub evm_nodes: usize,
    pub cometbft_nodes: usize,
    pub stopped: bool,
}

enum NodeWatcher {
    Evm(Watcher<EvmClient>),
    Cometbft(Watcher<CometbftClient>),
}

impl NodeWatcher {
    fn identity(&self) -> Arc<NodeIdentity> {
        match self {
            Self::Evm(watcher) => watcher.identity(),
            Self::Cometbft(watcher) => watcher.identity(),
        }
    }

    async fn run(self) {
        match self {
            Self::Evm(watcher) => watcher.run().await,
            Self::Cometbft(watcher) => watcher.run().await,
        }
    }
}

struct Inner {
    started: bool,
    stopped: bool,
    pending: Vec<NodeWatcher>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Supervisor {
    cancel: CancellationToken,
    heartbeats: Vec<NodeMetrics>,
    evm_nodes: usize,
    cometbft_nodes: usize,
    stop_timeout: Duration,
    inner: parking_lot::Mutex<Inner>,
}

impl Supervisor {
    /// Build watchers for every valid node entry. Invalid entries are logged
    /// and skipped; a configuration with zero usable entries is an error.
    pub fn new(config: &MonitorConfig) -> Result<Self, SupervisorError> {
        let cancel = CancellationToken::new();
        let mut pending = Vec::with_capacity(config.node_count());
        let mut heartbeats = Vec::with_capacity(config.node_count());
        let mut evm_nodes = 0;
        let mut cometbft_nodes = 0;

        for entry in &config.evm {
            if let Err(err) = entry.validate() {
                warn!(error = %err, "Skipping invalid evm node entry");
                continue;
            }
            let identity = Arc::new(NodeIdentity::new(
                &entry.chain_name,
                &entry.hostname,
                entry.protocol_name(),
                &entry.chain_id,
                &entry.node_version,
            ));
            heartbeats.push(NodeMetrics::new(identity.clone()));
            pending.push(NodeWatcher::Evm(Watcher::new(
                identity,
                EvmClient::new(&entry.http_url, &entry.ws_url),
                entry.check_interval(),
                entry.jitter(),
                cancel.clone(),
            )));
            evm_nodes += 1;
        }

        for entry in &config.cometbft {
            if let Err(err) = entry.validate() {
                warn!(error = %err, "Skipping invalid cometbft node entry");
                continue;
            }
            let identity = Arc::new(NodeIdentity::new(
                &entry.chain_name,
                &entry.hostname,
                entry.protocol_name(),
                &entry.chain_id,
                &entry.node_version,
            ));
            heartbeats.push(NodeMetrics::new(identity.clone()));
            pending.push(NodeWatcher::Cometbft(Watcher::new(
                identity,
                CometbftClient::new(&entry.http_url, entry.ws_endpoint()),
                entry.check_interval(),
                entry.jitter(),
                cancel.clone(),
            )));
            cometbft_nodes += 1;
        }

        if pending.is_empty() {
            return Err(SupervisorError::NoValidNodes);
        }

        Ok(Self {
            cancel,
            heartbeats,
            evm_nodes,
            cometbft_nodes,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            inner: parking_lot::Mutex::new(Inner {
                started: false,
                stopped: false,
                pending,
                handles: Vec::new(),
            }),
        })
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Spawn the heartbeat task and one contained task per watcher. Calling
    /// more than once is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.started || inner.stopped {
            warn!(
                started = inner.started,
                stopped = inner.stopped,
                "Ignoring start call"
            );
            return;
        }
        inner.started = true;

        let watchers = std::mem::take(&mut inner.pending);
        info!(nodes = watchers.len(), "Starting node watchers");

        inner
            .handles
            .push(tokio::spawn(heartbeat_loop(
                self.heartbeats.clone(),
                self.cancel.clone(),
            )));

        for watcher in watchers {
            let identity = watcher.identity();
            inner
                .handles
                .push(tokio::spawn(run_contained(watcher.run(), identity)));
        }
    }

    /// Cancel every task and wait for them to drain, up to the stop timeout.
    pub async fn stop(&self) {
        let handles = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                warn!("Ignoring stop call, already stopped");
                return;
            }
            inner.stopped = true;
            std::mem::take(&mut inner.handles)
        };

        info!(tasks = handles.len(), "Stopping node watchers");
        self.cancel.cancel();

        match tokio::time::timeout(self.stop_timeout, futures::future::join_all(handles)).await {
            Ok(_) => info!("All watcher tasks stopped"),
            Err(_elapsed) => warn!(
                timeout_seconds = self.stop_timeout.as_secs(),
                "Stop timed out waiting for watcher tasks"
            ),
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            total_nodes: self.evm_nodes + self.cometbft_nodes,
            evm_nodes: self.evm_nodes,
            cometbft_nodes: self.cometbft_nodes,
            stopped: self.inner.lock().stopped,
        }
    }

    #[cfg(test)]
    fn add_task(&self, handle: JoinHandle<()>) {
        self.inner.lock().handles.push(handle);
    }

    #[cfg(test)]
    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Advance every node's block-age gauge once per second until cancelled.
/// Together with the reset on each processed block this makes the gauge read
/// as seconds since the last block.
async fn heartbeat_loop(heartbeats: Vec<NodeMetrics>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a fresh gauge stays at
    // zero for a full second.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                for metrics in &heartbeats {
                    metrics.bump_block_age();
                }
            }
        }
    }
}

/// Panic boundary around one watcher task. A panicking watcher is logged
/// with its identity and stays down until the process restarts.
async fn run_contained(fut: impl std::future::Future<Output = ()>, identity: Arc<NodeIdentity>) {
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            hostname = %identity.host_name(),
            chain_name = %identity.chain_name(),
            panic = %message,
            "Watcher task panicked"
        );
    }
}
