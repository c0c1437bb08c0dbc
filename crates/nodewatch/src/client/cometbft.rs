//! CometBFT RPC client.
//!
//! Status and liveness probes use the node's http RPC (`/status`); block
//! headers come from the websocket event bus via a
//! `tm.event='NewBlockHeader'` subscription.

use crate::client::{
    BlockEvent,
    BlockHeader,
    BlockStream,
    ClientError,
    NodeClient,
    NodeStatus,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
};
use tracing::debug;
use url::Url;

const SUBSCRIPTION_BUFFER: usize = 64;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIBE_FRAME: &str = r#"{"jsonrpc":"2.0","method":"subscribe","id":1,"params":{"query":"tm.event='NewBlockHeader'"}}"#;

pub struct CometbftClient {
    http_url: String,
    ws_endpoint: String,
    http: Option<reqwest::Client>,
}

impl CometbftClient {
    pub fn new(http_url: impl Into<String>, ws_endpoint: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_endpoint: ws_endpoint.into(),
            http: None,
        }
    }

    fn http(&self) -> Result<&reqwest::Client, ClientError> {
        self.http.as_ref().ok_or(ClientError::NotConnected)
    }

    async fn fetch_status(&self) -> Result<StatusResult, ClientError> {
        let url = format!("{}/status", self.http_url.trim_end_matches('/'));
        let response = self
            .http()?
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| ClientError::Rpc(e.to_string()))?;

        let envelope: StatusEnvelope = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(envelope.result)
    }
}

impl NodeClient for CometbftClient {
    fn connection_kind(&self) -> &'static str {
        "http"
    }

    fn dials_on_connect(&self) -> bool {
        // connect only builds the reqwest client; the status call is the
        // real connection attempt.
        false
    }

    fn probe_endpoint(&self) -> &'static str {
        crate::metrics::ENDPOINT_NODE_STATUS
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        self.http = Some(client);
        Ok(())
    }

    async fn status(&self) -> Result<NodeStatus, ClientError> {
        let status = self.fetch_status().await?;
        Ok(NodeStatus {
            chain_id: Some(status.node_info.network),
            node_version: Some(status.node_info.version),
        })
    }

    async fn probe(&self) -> Result<(), ClientError> {
        self.fetch_status().await.map(|_| ())
    }

    async fn subscribe_new_blocks(&mut self) -> Result<BlockStream, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let ws_url = websocket_url(&self.http_url, &self.ws_endpoint)?;
        let (mut socket, _response) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| ClientError::Subscribe(e.to_string()))?;

        socket
            .send(Message::text(SUBSCRIBE_FRAME))
            .await
            .map_err(|e| ClientError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                let event: Option<BlockEvent> = match message {
                    Ok(Message::Text(text)) => match parse_header_event(&text) {
                        Ok(Some(header)) => Some(Ok(header)),
                        Ok(None) => None,
                        Err(err) => Some(Err(err)),
                    },
                    Ok(Message::Ping(_) | Message::Pong(_)) => None,
                    Ok(Message::Close(_)) => Some(Err(ClientError::Rpc(
                        "websocket closed by peer".to_string(),
                    ))),
                    Ok(_) => None,
                    Err(err) => Some(Err(ClientError::Rpc(err.to_string()))),
                };
                if let Some(event) = event {
                    let fatal = event.is_err();
                    if tx.send(event).await.is_err() || fatal {
                        return;
                    }
                }
            }
            debug!("CometBFT event stream ended");
        });

        Ok(BlockStream::with_abort(rx, forwarder.abort_handle()))
    }

    fn is_connected(&self) -> bool {
        self.http.is_some()
    }

    async fn disconnect(&mut self) {
        self.http = None;
    }
}

/// Derive the websocket event-bus url from the http RPC url.
fn websocket_url(http_url: &str, ws_endpoint: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(http_url)
        .map_err(|e| ClientError::Subscribe(format!("invalid http url: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Subscribe(format!(
                "unsupported url scheme {other:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::Subscribe("failed to set websocket scheme".to_string()))?;
    url.set_path(ws_endpoint);
    Ok(url)
}

/// Decode one frame from the event bus.
///
/// Subscription confirmations and other non-header frames yield `Ok(None)`;
/// an RPC-level error field is fatal for the subscription.
fn parse_header_event(text: &str) -> Result<Option<BlockHeader>, ClientError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(ClientError::Rpc(error.to_string()));
    }

    let Some(header) = value.pointer("/result/data/value/header") else {
        return Ok(None);
    };

    let height = header
        .get("height")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ClientError::InvalidResponse("header without height".to_string()))?
        .parse::<u64>()
        .map_err(|e| ClientError::InvalidResponse(format!("bad block height: {e}")))?;

    let time = header
        .get("time")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ClientError::InvalidResponse("header without time".to_string()))?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(time)
        .map_err(|e| ClientError::InvalidResponse(format!("bad block time: {e}")))?
        .timestamp()
        .max(0) as u64;

    Ok(Some(BlockHeader { height, timestamp }))
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    result: StatusResult,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    node_info: NodeInfo,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    network: String,
    #[serde(default)]
    version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_maps_schemes_and_endpoint() {
        let url = websocket_url("https://story.example.com:26657", "/websocket")
            .expect("derive ws url");
        assert_eq!(url.as_str(), "wss://story.example.com:26657/websocket");

        let url = websocket_url("http://127.0.0.1:26657", "/ws").expect("derive ws url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:26657/ws");
    }

    #[test]
    fn websocket_url_rejects_unknown_scheme() {
        assert!(websocket_url("ftp://example.com", "/websocket").is_err());
    }

    #[test]
    fn subscription_confirmation_is_not_a_header() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert_eq!(parse_header_event(frame).expect("parse frame"), None);
    }

    #[test]
    fn new_block_header_event_is_decoded() {
        let frame = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "query": "tm.event='NewBlockHeader'",
                "data": {
                    "type": "tendermint/event/NewBlockHeader",
                    "value": {
                        "header": {
                            "chain_id": "story-1",
                            "height": "1234567",
                            "time": "2024-06-01T12:00:00.123456789Z"
                        }
                    }
                }
            }
        }"#;

        let header = parse_header_event(frame)
            .expect("parse frame")
            .expect("frame should carry a header");
        assert_eq!(header.height, 1234567);
        assert_eq!(header.timestamp, 1717243200);
    }

    #[test]
    fn rpc_error_frame_is_fatal() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"boom"}}"#;
        assert!(matches!(
            parse_header_event(frame),
            Err(ClientError::Rpc(_))
        ));
    }

    #[test]
    fn malformed_height_is_invalid() {
        let frame = r#"{"result":{"data":{"value":{"header":{"height":"not-a-number","time":"2024-06-01T12:00:00Z"}}}}}"#;
        assert!(matches!(
            parse_header_event(frame),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn calls_before_connect_report_not_connected() {
        let mut client = CometbftClient::new("http://127.0.0.1:26657", "/websocket");
        assert!(matches!(client.status().await, Err(ClientError::NotConnected)));
        assert!(matches!(
            client.subscribe_new_blocks().await,
            Err(ClientError::NotConnected)
        ));
    }
}
