use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    common::{HanabiResult, now_ms},
    configs::{Config, TransportKind},
    interop::{ChannelTransport, HttpTransport, Payload, PeerCall, PeerTransport},
};

/// Another fleet member as seen by the coordinator.
pub struct Peer {
    name: String,
    transport: Arc<dyn PeerTransport>,
    /// Set for channel peers; their link is attached when they dial in.
    channel: Option<Arc<ChannelTransport>>,
    /// Last sign of life in epoch ms. `0` until the peer is first heard from.
    last_seen: AtomicU64,
    /// Last liveness the heartbeat loop reported, to log transitions once.
    online: AtomicBool,
}

impl Peer {
    pub fn new(name: impl Into<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            channel: None,
            last_seen: AtomicU64::new(0),
            online: AtomicBool::new(false),
        }
    }

    pub fn over_channel(name: impl Into<String>) -> Self {
        let name = name.into();
        let channel = Arc::new(ChannelTransport::new(name.clone()));
        Self {
            name,
            transport: channel.clone(),
            channel: Some(channel),
            last_seen: AtomicU64::new(0),
            online: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Option<&Arc<ChannelTransport>> {
        self.channel.as_ref()
    }

    pub async fn call(&self, call: PeerCall) -> HanabiResult<Payload> {
        self.transport.call(call).await
    }

    pub fn mark_alive(&self) {
        self.last_seen.store(now_ms(), Ordering::Relaxed);
    }

    pub fn mark_dead(&self) {
        self.last_seen.store(0, Ordering::Relaxed);
    }

    /// Heard from within `window`.
    pub fn is_alive(&self, window: Duration) -> bool {
        match self.last_seen.load(Ordering::Relaxed) {
            0 => false,
            seen => now_ms().saturating_sub(seen) <= window.as_millis() as u64,
        }
    }

    /// Records the liveness last reported and returns the previous value.
    pub(crate) fn swap_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::Relaxed)
    }

    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.transport.describe())
    }
}

/// The coordinator's view of its configured peers.
pub fn from_config(config: &Config) -> HanabiResult<Vec<Arc<Peer>>> {
    if !config.fleet.is_coordinator() {
        return Ok(Vec::new());
    }
    config
        .fleet
        .peers
        .iter()
        .map(|peer| {
            Ok(Arc::new(match peer.transport {
                TransportKind::Http => Peer::new(
                    peer.name.clone(),
                    Arc::new(HttpTransport::new(
                        peer.endpoint.clone(),
                        config.server.password.clone(),
                        config.session.rpc_timeout(),
                    )?),
                ),
                TransportKind::Channel => Peer::over_channel(peer.name.clone()),
            }))
        })
        .collect()
}
