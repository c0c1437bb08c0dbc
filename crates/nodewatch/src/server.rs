//! Metrics and health endpoint server.

use axum::{
    Router,
    extract::State,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{
    io,
    net::SocketAddr,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    instrument,
};

/// How often idle histogram samples are drained from the recorder.
const UPKEEP_PERIOD: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum MetricsServerError {
    #[error("failed to bind metrics server address: {addr}")]
    BindAddress {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("metrics server error on {addr}")]
    ServerError {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Serves the prometheus exposition text and a liveness endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    bind_addr: SocketAddr,
    handle: PrometheusHandle,
    shutdown_token: CancellationToken,
}

impl MetricsServer {
    pub fn new(bind_addr: SocketAddr, handle: PrometheusHandle) -> Self {
        Self {
            bind_addr,
            handle,
            shutdown_token: CancellationToken::new(),
        }
    }

    #[instrument(
        name = "metrics_server::run",
        skip(self),
        fields(bind_addr = %self.bind_addr),
        level = "debug"
    )]
    pub async fn run(&self) -> Result<(), MetricsServerError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| {
                error!(
                    bind_addr = %self.bind_addr,
                    error = ?e,
                    "Failed to bind metrics server listener"
                );
                MetricsServerError::BindAddress {
                    addr: self.bind_addr,
                    source: e,
                }
            })?;

        info!(
            bind_addr = %self.bind_addr,
            "Metrics server starting"
        );

        let upkeep_handle = self.handle.clone();
        let upkeep_token = self.shutdown_token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(UPKEEP_PERIOD);
            loop {
                tokio::select! {
                    () = upkeep_token.cancelled() => return,
                    _ = ticker.tick() => upkeep_handle.run_upkeep(),
                }
            }
        });

        let shutdown = self.shutdown_token.clone();
        axum::serve(listener, metrics_router(self.handle.clone()))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| {
                error!(error = ?e, "Metrics server failed");
                MetricsServerError::ServerError {
                    addr: self.bind_addr,
                    source: e,
                }
            })?;

        Ok(())
    }

    #[instrument(name = "metrics_server::stop", skip(self), level = "info")]
    pub fn stop(&self) {
        info!("Stopping metrics server");
        self.shutdown_token.cancel();
    }
}

#[instrument(name = "metrics_server::health", level = "trace")]
async fn health() -> &'static str {
    "OK"
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn serves_health_and_metrics_and_shuts_down() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let token = CancellationToken::new();
        let shutdown = token.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, metrics_router(handle))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let health = reqwest::get(format!("http://{addr}/health"))
            .await
            .expect("health request")
            .text()
            .await
            .expect("health body");
        assert_eq!(health, "OK");

        let metrics = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .expect("metrics request");
        assert!(metrics.status().is_success());

        token.cancel();
        server
            .await
            .expect("server task should join")
            .expect("server should shut down cleanly");
    }
}
