use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Places sessions on peers when it cannot hold them itself.
    Coordinator,
    #[default]
    Peer,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One POST per operation against the remote's HTTP endpoints.
    #[default]
    Http,
    /// A persistent operation channel over a WebSocket.
    Channel,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PeerConfig {
    pub name: String,
    /// Base URL (`http://host:port`) for HTTP peers. For channel peers on the
    /// coordinator this is informational; the peer dials in.
    pub endpoint: String,
    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FleetConfig {
    /// This process' name, unique across the fleet.
    pub name: String,
    #[serde(default)]
    pub role: Role,
    /// How a peer reaches the coordinator. Ignored on the coordinator.
    pub coordinator: Option<PeerConfig>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl FleetConfig {
    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    pub fn validate(&self) -> AnyResult<()> {
        if self.name.is_empty() {
            return Err("fleet.name must not be empty".into());
        }
        let mut seen = HashSet::new();
        seen.insert(self.name.as_str());
        for peer in &self.peers {
            if !seen.insert(peer.name.as_str()) {
                return Err(format!("duplicate fleet member name `{}`", peer.name).into());
            }
        }
        if !self.is_coordinator() && !self.peers.is_empty() {
            return Err("only the coordinator may list fleet.peers".into());
        }
        Ok(())
    }
}
