//! Per-node identity labels.
//!
//! The chain name, host name and protocol name are fixed at construction.
//! Chain id and node version start out as whatever the configuration claims
//! and are overwritten whenever a successful status probe reveals them. Only
//! the owning watcher ever writes; everyone else gets cloned snapshots.

use crate::client::NodeStatus;
use parking_lot::RwLock;

#[derive(Debug)]
pub struct NodeIdentity {
    chain_name: String,
    host_name: String,
    protocol_name: String,
    discovered: RwLock<Discovered>,
}

#[derive(Debug, Clone, Default)]
struct Discovered {
    chain_id: String,
    node_version: String,
}

impl NodeIdentity {
    pub fn new(
        chain_name: impl Into<String>,
        host_name: impl Into<String>,
        protocol_name: impl Into<String>,
        chain_id: impl Into<String>,
        node_version: impl Into<String>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            host_name: host_name.into(),
            protocol_name: protocol_name.into(),
            discovered: RwLock::new(Discovered {
                chain_id: chain_id.into(),
                node_version: node_version.into(),
            }),
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// Snapshot of the last discovered chain id. May lag a reconnect cycle.
    pub fn chain_id(&self) -> String {
        self.discovered.read().chain_id.clone()
    }

    /// Snapshot of the last discovered node version. May lag a reconnect cycle.
    pub fn node_version(&self) -> String {
        self.discovered.read().node_version.clone()
    }

    /// Fold a successful status probe into the identity. Fields the probe did
    /// not report keep their previous value.
    pub fn record_status(&self, status: &NodeStatus) {
        let mut discovered = self.discovered.write();
        if let Some(chain_id) = &status.chain_id {
            if !chain_id.is_empty() {
                discovered.chain_id = chain_id.clone();
            }
        }
        if let Some(node_version) = &status.node_version {
            if !node_version.is_empty() {
                discovered.node_version = node_version.clone();
            }
        }
    }
}
