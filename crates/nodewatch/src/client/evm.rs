//! EVM JSON-RPC client backed by Alloy providers.
//!
//! Block headers arrive over a `newHeads` websocket subscription; status and
//! liveness probes go over http. Both transports are rebuilt together on
//! every connect so a reconnect never mixes an old websocket with a new http
//! session.

use crate::client::{
    BlockHeader,
    BlockStream,
    ClientError,
    NodeClient,
    NodeStatus,
};
use alloy::providers::{
    Provider,
    ProviderBuilder,
    WsConnect,
};
use alloy_provider::RootProvider;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

const SUBSCRIPTION_BUFFER: usize = 64;

pub struct EvmClient {
    http_url: String,
    ws_url: String,
    http: Option<RootProvider>,
    ws: Option<RootProvider>,
}

impl EvmClient {
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_url: ws_url.into(),
            http: None,
            ws: None,
        }
    }

    fn http(&self) -> Result<&RootProvider, ClientError> {
        self.http.as_ref().ok_or(ClientError::NotConnected)
    }
}

impl NodeClient for EvmClient {
    fn connection_kind(&self) -> &'static str {
        if self.ws_url.is_empty() { "http" } else { "ws" }
    }

    fn dials_on_connect(&self) -> bool {
        // Without a websocket url, connect only builds a local http handle;
        // the status stage reports the http outcome.
        !self.ws_url.is_empty()
    }

    fn probe_endpoint(&self) -> &'static str {
        crate::metrics::ENDPOINT_BLOCK_RETRIEVAL
    }

    fn supports_subscriptions(&self) -> bool {
        !self.ws_url.is_empty()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let ws = if self.ws_url.is_empty() {
            None
        } else {
            Some(
                ProviderBuilder::new()
                    .connect_ws(WsConnect::new(&self.ws_url))
                    .await
                    .map_err(|e| ClientError::Connect(e.to_string()))?
                    .root()
                    .clone(),
            )
        };

        let http_url = reqwest::Url::parse(&self.http_url)
            .map_err(|e| ClientError::Connect(format!("invalid http url: {e}")))?;
        let http = ProviderBuilder::new().connect_http(http_url).root().clone();

        self.ws = ws;
        self.http = Some(http);
        Ok(())
    }

    /// Chain id over http, plus a best-effort `web3_clientVersion`. A node
    /// that does not expose the client version still reports a valid status.
    async fn status(&self) -> Result<NodeStatus, ClientError> {
        let http = self.http()?;
        let chain_id = http
            .get_chain_id()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?;

        let node_version: Option<String> = http
            .raw_request("web3_clientVersion".into(), ())
            .await
            .map_err(|e| {
                debug!(error = %e, "web3_clientVersion unavailable");
                e
            })
            .ok();

        Ok(NodeStatus {
            chain_id: Some(chain_id.to_string()),
            node_version,
        })
    }

    async fn probe(&self) -> Result<(), ClientError> {
        self.http()?
            .get_block_number()
            .await
            .map(|_| ())
            .map_err(|e| ClientError::Rpc(e.to_string()))
    }

    async fn subscribe_new_blocks(&mut self) -> Result<BlockStream, ClientError> {
        let Some(ws) = self.ws.as_ref() else {
            return Err(if self.ws_url.is_empty() {
                ClientError::NoWsEndpoint
            } else {
                ClientError::NotConnected
            });
        };
        let subscription = ws
            .subscribe_blocks()
            .await
            .map_err(|e| ClientError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(async move {
            let mut stream = subscription.into_stream();
            while let Some(header) = stream.next().await {
                let event = Ok(BlockHeader {
                    height: header.inner.number,
                    timestamp: header.inner.timestamp,
                });
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // Stream end closes the channel, which the watcher treats as a
            // dead subscription.
        });

        Ok(BlockStream::with_abort(rx, forwarder.abort_handle()))
    }

    fn is_connected(&self) -> bool {
        if self.http.is_none() {
            return false;
        }
        self.ws.is_some() || self.ws_url.is_empty()
    }

    async fn disconnect(&mut self) {
        self.ws = None;
        self.http = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_ws_url_means_probes_only() {
        let mut client = EvmClient::new("http://127.0.0.1:8545", "");
        assert!(!client.supports_subscriptions());

        client.connect().await.expect("http-only connect is local");
        assert!(client.is_connected());
        assert!(matches!(
            client.subscribe_new_blocks().await,
            Err(ClientError::NoWsEndpoint)
        ));
    }

    #[tokio::test]
    async fn calls_before_connect_report_not_connected() {
        let mut client = EvmClient::new("http://127.0.0.1:8545", "ws://127.0.0.1:8546");
        assert!(matches!(client.status().await, Err(ClientError::NotConnected)));
        assert!(matches!(client.probe().await, Err(ClientError::NotConnected)));
        assert!(matches!(
            client.subscribe_new_blocks().await,
            Err(ClientError::NotConnected)
        ));
    }
}
