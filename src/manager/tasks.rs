//! Background loops owned by the session manager. Each runs until the
//! manager's shutdown token fires.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    interop::PeerCall,
    manager::SessionManager,
    protocol::EngineEvent,
    session::Session,
};

/// Spawns every loop this process needs.
pub fn spawn_all(manager: &Arc<SessionManager>, events: flume::Receiver<EngineEvent>) {
    tokio::spawn(reaper(manager.clone()));
    tokio::spawn(event_pump(manager.clone(), events));
    if manager.is_coordinator() && !manager.peers().is_empty() {
        tokio::spawn(heartbeat(manager.clone()));
    }
}

/// Destroys local sessions that have had nothing playing for longer than
/// the configured idle timeout.
pub async fn reaper(manager: Arc<SessionManager>) {
    let config = &manager.context().config;
    let timeout = config.idle_timeout();
    let mut interval = tokio::time::interval(config.reaper_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = manager.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        for session in manager.local_sessions().await {
            let Some(idle) = session.idle_for() else {
                continue;
            };
            if idle < timeout {
                continue;
            }
            info!("[{}] Idle for {:?}, disconnecting", session.guild(), idle);
            manager
                .announce(session.text_channel(), "Disconnecting due to inactivity.")
                .await;
            match manager.destroy_session(session.voice()).await {
                Ok(()) | Err(crate::common::HanabiError::NoSessionExists) => {}
                Err(e) => warn!("[{}] Idle teardown failed: {}", session.guild(), e),
            }
        }
    }
}

/// Coordinator only: pings every peer and keeps their liveness current.
/// Remote sessions on a peer that stopped answering are forgotten.
pub async fn heartbeat(manager: Arc<SessionManager>) {
    let config = &manager.context().config;
    let window = config.liveness_window();
    let mut interval = tokio::time::interval(config.heartbeat_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = manager.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        for peer in manager.peers() {
            match peer.call(PeerCall::heartbeat()).await {
                Ok(_) => {
                    peer.mark_alive();
                    if !peer.swap_online(true) {
                        info!("{} is alive", peer.describe());
                    }
                }
                Err(e) => {
                    debug!("Heartbeat to {} failed: {}", peer.name(), e);
                    if !peer.is_alive(window) && peer.swap_online(false) {
                        warn!("{} stopped answering heartbeats", peer.describe());
                        forget_sessions_on(&manager, peer.name()).await;
                    }
                }
            }
        }
    }
}

async fn forget_sessions_on(manager: &SessionManager, peer: &str) {
    use crate::session::Location;

    for session in manager.sessions().await {
        if session.location() == Location::Remote(peer.to_string()) {
            manager.delete_session(session.voice()).await;
        }
    }
}

/// Routes audio-engine events to sessions, one task per event so a slow
/// callback never holds up the stream.
pub async fn event_pump(manager: Arc<SessionManager>, events: flume::Receiver<EngineEvent>) {
    let shutdown = manager.shutdown_token();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv_async() => match event {
                Ok(event) => event,
                Err(_) => {
                    debug!("Engine event stream ended");
                    return;
                }
            },
        };
        let manager = manager.clone();
        tokio::spawn(async move { manager.dispatch_event(event).await });
    }
}
