mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::*;
use hanabi::{
    common::{ChannelId, GuildId, HanabiError, HanabiResult, VoiceId},
    configs::Role,
    interop::{Payload, PeerCall, PeerTransport},
    manager::{Peer, tasks},
    protocol::EngineEvent,
    session::{Location, Session},
};
use parking_lot::Mutex;

/// Answers `connect` with `on_connect` and everything else with
/// `otherwise`, remembering what it was asked.
struct ScriptedPeer {
    on_connect: Option<HanabiError>,
    otherwise: Option<HanabiError>,
    calls: Mutex<Vec<PeerCall>>,
}

impl ScriptedPeer {
    fn scripted(on_connect: Option<HanabiError>, otherwise: Option<HanabiError>) -> Arc<Self> {
        Arc::new(Self {
            on_connect,
            otherwise,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn accepting() -> Arc<Self> {
        Self::scripted(None, None)
    }

    fn refusing(error: HanabiError) -> Arc<Self> {
        Self::scripted(Some(error), None)
    }

    /// Takes sessions but has lost them by the time anything else arrives.
    fn forgetful() -> Arc<Self> {
        Self::scripted(None, Some(HanabiError::NoSessionExists))
    }

    fn ops(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.op()).collect()
    }
}

#[async_trait]
impl PeerTransport for ScriptedPeer {
    async fn call(&self, call: PeerCall) -> HanabiResult<Payload> {
        let answer = match call {
            PeerCall::Connect { .. } => &self.on_connect,
            _ => &self.otherwise,
        };
        self.calls.lock().push(call);
        match answer {
            Some(error) => Err(error.clone()),
            None => Ok(Payload::new()),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn live_peer(name: &str, transport: Arc<ScriptedPeer>) -> Arc<Peer> {
    let peer = Arc::new(Peer::new(name, transport));
    peer.mark_alive();
    peer
}

#[tokio::test]
async fn one_session_per_voice_channel() {
    let h = harness();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    assert!(matches!(
        h.manager.create_session(GUILD, VOICE, TEXT).await,
        Err(HanabiError::SessionAlreadyExists)
    ));
}

#[tokio::test]
async fn a_peer_without_room_reports_unavailable() {
    let h = HarnessBuilder::new("child-1").role(Role::Peer).build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    assert!(matches!(
        h.manager.create_session(GUILD, VoiceId(12), TEXT).await,
        Err(HanabiError::NotAvailable)
    ));
    assert!(matches!(
        h.manager.accept_session(GUILD, VoiceId(12), TEXT).await,
        Err(HanabiError::NotAvailable)
    ));
}

#[tokio::test]
async fn coordinator_places_overflow_on_the_first_accepting_peer() {
    let full = ScriptedPeer::refusing(HanabiError::NotAvailable);
    let open = ScriptedPeer::accepting();
    let asleep = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("parent")
        .peer(Arc::new(Peer::new("child-0", asleep.clone())))
        .peer(live_peer("child-1", full.clone()))
        .peer(live_peer("child-2", open.clone()))
        .build();

    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    let overflow = h
        .manager
        .create_session(GUILD, VoiceId(12), TEXT)
        .await
        .unwrap();

    assert_eq!(overflow.location(), Location::Remote("child-2".to_string()));
    assert!(asleep.ops().is_empty());
    assert_eq!(full.ops(), ["connect"]);
    assert_eq!(open.ops(), ["connect"]);

    overflow.play(U1, "A", Some(3)).await.unwrap();
    assert_eq!(open.ops(), ["connect", "play"]);
    assert_eq!(
        open.calls.lock()[1],
        PeerCall::Play {
            voice: VoiceId(12),
            requester: U1,
            query: "A".to_string(),
            position: Some(3),
        }
    );
}

#[tokio::test]
async fn busy_when_no_peer_accepts() {
    let h = HarnessBuilder::new("parent")
        .peer(live_peer(
            "child-1",
            ScriptedPeer::refusing(HanabiError::Timeout("connect".into())),
        ))
        .build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    assert!(matches!(
        h.manager.create_session(GUILD, VoiceId(12), TEXT).await,
        Err(HanabiError::AllSessionsBusy)
    ));
    assert!(h.manager.get_session(VoiceId(12)).await.is_err());
}

#[tokio::test]
async fn placing_by_name() {
    let open = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("parent")
        .peer(live_peer("child-1", open.clone()))
        .build();

    assert!(matches!(
        h.manager
            .create_session_with("child-9", GUILD, VOICE, TEXT)
            .await,
        Err(HanabiError::InvalidName(name)) if name == "child-9"
    ));

    let session = h
        .manager
        .create_session_with("child-1", GUILD, VOICE, TEXT)
        .await
        .unwrap();
    assert_eq!(session.location(), Location::Remote("child-1".to_string()));

    let session = h
        .manager
        .create_session_with("parent", GUILD, VoiceId(12), TEXT)
        .await
        .unwrap();
    assert_eq!(session.location(), Location::Local);
}

#[tokio::test]
async fn local_lookup_ignores_remote_sessions() {
    let open = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("parent")
        .guilds(vec![GUILD])
        .peer(live_peer("child-1", open.clone()))
        .build();
    let other = GuildId(2);

    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    let remote = h
        .manager
        .create_session(other, VoiceId(22), ChannelId(23))
        .await
        .unwrap();
    assert_eq!(remote.location(), Location::Remote("child-1".to_string()));

    assert!(h.manager.get_local_session(GUILD).await.is_ok());
    assert!(matches!(
        h.manager.get_local_session(other).await,
        Err(HanabiError::NoSessionExists)
    ));

    let states = h.manager.voice_states().await;
    let statuses: Vec<_> = states.iter().map(|s| (s.voice, s.status)).collect();
    assert_eq!(statuses, [(VOICE, "idle"), (VoiceId(22), "remote")]);

    h.manager.destroy_session(VoiceId(22)).await.unwrap();
    assert_eq!(open.ops(), ["connect", "disconnect"]);
    assert_eq!(h.manager.sessions().await.len(), 1);
}

#[tokio::test]
async fn deleting_a_mirror_never_calls_the_peer() {
    let open = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("parent")
        .guilds(Vec::new())
        .peer(live_peer("child-1", open.clone()))
        .build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    assert!(h.manager.delete_session(VOICE).await.is_some());
    assert!(h.manager.delete_session(VOICE).await.is_none());
    assert_eq!(open.ops(), ["connect"]);
}

#[tokio::test]
async fn delete_never_drops_a_local_session() {
    let h = harness();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    assert!(h.manager.delete_session(VOICE).await.is_none());
    assert!(h.manager.get_local_session(GUILD).await.is_ok());
    assert!(h.gateway.left.lock().is_empty());

    let reply = PeerCall::Delete { voice: VOICE }
        .execute(&h.manager)
        .await
        .unwrap();
    assert_eq!(reply.get("action").and_then(|a| a.as_str()), Some("none"));
    assert_eq!(h.manager.sessions().await.len(), 1);
}

#[tokio::test]
async fn remote_teardown_tolerates_a_peer_that_already_forgot() {
    let gone = ScriptedPeer::forgetful();
    let h = HarnessBuilder::new("parent")
        .guilds(Vec::new())
        .peer(live_peer("child-1", gone.clone()))
        .build();
    let session = h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    assert!(matches!(
        session.play(U1, "A", None).await,
        Err(HanabiError::NoSessionExists)
    ));
    h.manager.destroy_session(VOICE).await.unwrap();
    assert!(h.manager.sessions().await.is_empty());
    assert_eq!(gone.ops(), ["connect", "play", "disconnect"]);
}

#[tokio::test]
async fn voice_moves_rekey_the_session() {
    let coordinator = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("child-1")
        .role(Role::Peer)
        .coordinator(coordinator.clone())
        .build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    h.manager
        .handle_voice_move(GUILD, Some(VoiceId(12)))
        .await
        .unwrap();
    assert!(h.manager.get_session(VOICE).await.is_err());
    assert_eq!(h.manager.get_session(VoiceId(12)).await.unwrap().voice(), VoiceId(12));

    // The coordinator hears about the old channel in the background.
    for _ in 0..100 {
        if !coordinator.ops().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(coordinator.calls.lock()[0], PeerCall::Delete { voice: VOICE });

    h.manager.handle_voice_move(GUILD, None).await.unwrap();
    assert!(h.manager.sessions().await.is_empty());
}

#[tokio::test]
async fn voice_updates_feed_the_engine_and_follow_moves() {
    let h = harness();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    h.manager
        .on_voice_server_update(GUILD, "token".into(), "eu.voice.test".into())
        .await;
    h.manager
        .on_voice_state_update(GUILD, Some(VoiceId(12)), "voice-session".into())
        .await
        .unwrap();
    assert_eq!(
        h.engine.calls(GUILD),
        vec![
            EngineCall::VoiceServer("eu.voice.test".into()),
            EngineCall::VoiceState(Some(VoiceId(12)))
        ]
    );
    assert_eq!(h.manager.get_session(VoiceId(12)).await.unwrap().voice(), VoiceId(12));

    h.manager
        .on_voice_state_update(GUILD, None, "voice-session".into())
        .await
        .unwrap();
    assert!(h.manager.sessions().await.is_empty());
    assert!(h.engine.calls(GUILD).contains(&EngineCall::VoiceState(None)));
}

#[tokio::test]
async fn a_remote_voice_disconnect_destroys_the_session() {
    let h = harness();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    h.manager
        .dispatch_event(EngineEvent::WebSocketClosed {
            guild_id: GUILD,
            code: 4006,
            reason: "session no longer valid".into(),
            by_remote: true,
        })
        .await;
    assert!(h.manager.get_session(VOICE).await.is_ok());

    h.manager
        .dispatch_event(EngineEvent::WebSocketClosed {
            guild_id: GUILD,
            code: 4014,
            reason: "disconnected".into(),
            by_remote: true,
        })
        .await;
    assert!(h.manager.get_session(VOICE).await.is_err());
}

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let h = HarnessBuilder::new("parent")
        .config(|config| {
            config.idle_timeout_secs = 0;
            config.reaper_interval_secs = 1;
        })
        .build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    tokio::spawn(tasks::reaper(h.manager.clone()));

    for _ in 0..200 {
        if h.manager.sessions().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.manager.sessions().await.is_empty());
    assert!(h.chat.saw("Disconnecting due to inactivity."));
    h.manager.shutdown_token().cancel();
}

#[tokio::test]
async fn stopping_forwards_shutdown_to_live_peers() {
    let live = ScriptedPeer::accepting();
    let asleep = ScriptedPeer::accepting();
    let h = HarnessBuilder::new("parent")
        .peer(live_peer("child-1", live.clone()))
        .peer(Arc::new(Peer::new("child-2", asleep.clone())))
        .build();
    h.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();

    h.manager
        .stop(Some(hanabi::manager::ShutdownKind::Reinit))
        .await;
    assert!(h.manager.sessions().await.is_empty());
    assert_eq!(live.ops(), ["reinit"]);
    assert!(asleep.ops().is_empty());
}
