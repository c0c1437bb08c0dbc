//! `client`
//!
//! Per-protocol node clients and the capability set the watcher drives them
//! through. Each protocol family (EVM JSON-RPC, CometBFT RPC) implements the
//! same abstract surface: connect, status, subscribe to new block headers,
//! liveness check, disconnect.

pub mod cometbft;
pub mod evm;

pub use cometbft::CometbftClient;
pub use evm::EvmClient;

use tokio::{
    sync::mpsc,
    task::AbortHandle,
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("websocket endpoint not configured")]
    NoWsEndpoint,
    #[error("client is not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("malformed response: {0}")]
    InvalidResponse(String),
    #[error("probe timed out")]
    Timeout,
}

/// Minimal header carried by a block subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    /// Block timestamp in seconds since the unix epoch.
    pub timestamp: u64,
}

/// Point-in-time node status. Fields the protocol does not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub chain_id: Option<String>,
    pub node_version: Option<String>,
}

/// One event delivered by an active subscription. `Err` means the
/// subscription surfaced a transport error and should be replaced.
pub type BlockEvent = Result<BlockHeader, ClientError>;

/// Handle to an active block subscription.
///
/// The channel closing means the subscription is dead. Dropping the stream
/// aborts the forwarding task, which is the best-effort unsubscribe path.
#[derive(Debug)]
pub struct BlockStream {
    rx: mpsc::Receiver<BlockEvent>,
    abort: Option<AbortHandle>,
}

impl BlockStream {
    pub fn new(rx: mpsc::Receiver<BlockEvent>) -> Self {
        Self { rx, abort: None }
    }

    pub fn with_abort(rx: mpsc::Receiver<BlockEvent>, abort: AbortHandle) -> Self {
        Self {
            rx,
            abort: Some(abort),
        }
    }

    /// Next event, or `None` once the subscription has terminated.
    pub async fn next(&mut self) -> Option<BlockEvent> {
        self.rx.recv().await
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Capability set every protocol client exposes to its watcher.
///
/// The watcher owns exactly one client and drives it from a single task, so
/// implementations never see concurrent calls.
#[allow(async_fn_in_trait)]
pub trait NodeClient: Send + 'static {
    /// Transport dialed by `connect`, labeling connection-attempt metrics
    /// (`http` or `ws`).
    fn connection_kind(&self) -> &'static str;

    /// Transport carrying the status probe.
    fn status_kind(&self) -> &'static str {
        "http"
    }

    /// Whether `connect` performs a remote dial worth counting on success.
    /// Clients that only build a local handle report their outcome through
    /// the status stage instead.
    fn dials_on_connect(&self) -> bool {
        true
    }

    /// Endpoint label used on health-probe metrics.
    fn probe_endpoint(&self) -> &'static str;

    /// Whether this client can deliver a block subscription at all. A node
    /// configured without a websocket endpoint is monitored by periodic
    /// probes only.
    fn supports_subscriptions(&self) -> bool {
        true
    }

    /// Establish the underlying connection(s).
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// One status round trip. Success reveals chain id and node version.
    async fn status(&self) -> Result<NodeStatus, ClientError>;

    /// Lightweight request used to re-probe health after each block.
    async fn probe(&self) -> Result<(), ClientError>;

    /// Open a new-block-header subscription.
    async fn subscribe_new_blocks(&mut self) -> Result<BlockStream, ClientError>;

    fn is_connected(&self) -> bool;

    /// Release the connection. Idempotent and error tolerant.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_stream_yields_none_after_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = BlockStream::new(rx);

        tx.send(Ok(BlockHeader {
            height: 7,
            timestamp: 1700000000,
        }))
        .await
        .expect("send block");
        drop(tx);

        assert!(matches!(
            stream.next().await,
            Some(Ok(BlockHeader { height: 7, .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_aborts_the_forwarding_task() {
        let (_tx, rx) = mpsc::channel::<BlockEvent>(1);
        let forwarder = tokio::spawn(std::future::pending::<()>());
        let stream = BlockStream::with_abort(rx, forwarder.abort_handle());

        drop(stream);

        let joined = forwarder.await;
        assert!(joined.expect_err("task should be aborted").is_cancelled());
    }
}
