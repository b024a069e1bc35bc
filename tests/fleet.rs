//! Two fleet members in one process, talking over real sockets.
mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use hanabi::{
    common::HanabiError,
    configs::Role,
    interop::{ChannelClient, ChannelTransport, HttpTransport, Interop, PeerCall, PeerTransport},
    manager::{Peer, SessionManager},
    session::{Location, Session},
    transport::{AppState, http_server},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const PASSWORD: &str = "youshallnotpass";
const TIMEOUT: Duration = Duration::from_secs(2);

/// Serves `manager` on an ephemeral port and returns its address.
async fn serve(manager: &Arc<SessionManager>) -> (std::net::SocketAddr, Arc<Interop>) {
    let interop = Arc::new(Interop::new(manager.clone()).unwrap());
    let state = Arc::new(AppState {
        password: PASSWORD.to_string(),
        rpc_timeout: TIMEOUT,
        interop: interop.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, http_server::router(state)).await.unwrap();
    });
    (addr, interop)
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_run_on_an_http_peer() {
    let child = HarnessBuilder::new("child-1").role(Role::Peer).build();
    let (addr, _) = serve(&child.manager).await;

    let transport =
        HttpTransport::new(format!("http://{}", addr), PASSWORD, TIMEOUT).unwrap();
    let peer = Arc::new(Peer::new("child-1", Arc::new(transport)));
    peer.mark_alive();
    let parent = HarnessBuilder::new("parent")
        .guilds(Vec::new())
        .peer(peer.clone())
        .build();

    peer.call(PeerCall::heartbeat()).await.unwrap();

    let session = parent.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    assert_eq!(session.location(), Location::Remote("child-1".to_string()));
    assert!(child.manager.get_local_session(GUILD).await.is_ok());

    session.play(U1, "A", None).await.unwrap();
    assert_eq!(child.engine.plays(GUILD), vec![("A".to_string(), 100)]);

    // Failures come back as the same error the peer raised.
    let err = session.play(U1, "B", Some(0)).await.unwrap_err();
    assert_eq!(
        err,
        HanabiError::InvalidPosition("Queue positions start at `1`.".to_string())
    );
    assert!(matches!(
        session.enqueue(hanabi::session::EnqueueRequest {
            requester: U1,
            owner: U1,
            name: "nope".into(),
            shuffle: false,
            mode: Default::default(),
            bypass_owner: false,
        })
        .await,
        Err(HanabiError::PlaylistNotFound(_))
    ));

    parent.manager.destroy_session(VOICE).await.unwrap();
    assert!(child.manager.sessions().await.is_empty());
    assert!(parent.manager.sessions().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_routes_speak_the_envelope() {
    let child = HarnessBuilder::new("child-1").role(Role::Peer).build();
    let (addr, _) = serve(&child.manager).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let unauthorised = client
        .post(format!("{}/api/voice/connect", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorised.status(), reqwest::StatusCode::UNAUTHORIZED);

    let post = |path: &str, body: Value| {
        client
            .post(format!("{}{}", base, path))
            .header("Authorization", PASSWORD)
            .json(&body)
            .send()
    };

    let reply: Value = post("/api/voice/connect", json!({"gid": 1, "vid": "11", "cid": 21}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], "success");

    let reply: Value = post("/api/voice/connect", json!({"gid": 1, "vid": 11, "cid": 21}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], "SessionExists");

    let reply: Value = post("/api/voice/volume", json!({"vid": 11, "uid": 101, "setting": "loud"}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], "SettingError");
    assert_eq!(reply["message"], "The setting `loud` is not valid.");

    let reply: Value = post("/api/voice/play", json!({"vid": 11}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], "Malformed");

    let states: Value = client
        .get(format!("{}/api/voice/states", base))
        .header("Authorization", PASSWORD)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(states["response"], "success");
    assert_eq!(states["states"][0]["voice"], 11);
    assert_eq!(states["states"][0]["status"], "idle");

    let wrong = HttpTransport::new(base, "wrong", TIMEOUT).unwrap();
    assert!(matches!(
        wrong.call(PeerCall::States).await,
        Err(HanabiError::Transport(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_run_on_a_channel_peer() {
    let parent = HarnessBuilder::new("parent")
        .guilds(Vec::new())
        .peer(Arc::new(Peer::over_channel("child-1")))
        .build();
    let (addr, _) = serve(&parent.manager).await;

    let uplink = Arc::new(ChannelTransport::new("parent"));
    let child = HarnessBuilder::new("child-1")
        .role(Role::Peer)
        .coordinator(uplink.clone())
        .build();
    let child_interop = Arc::new(Interop::new(child.manager.clone()).unwrap());
    let cancel = CancellationToken::new();
    let client = ChannelClient::new(
        format!("ws://{}/interop", addr),
        PASSWORD,
        "child-1",
        TIMEOUT,
        3,
        uplink.clone(),
        child_interop,
        cancel.clone(),
    );
    tokio::spawn(client.run());

    let window = parent.manager.context().config.liveness_window();
    let parent_manager = parent.manager.clone();
    eventually(async || {
        parent_manager
            .peer("child-1")
            .is_some_and(|peer| peer.is_alive(window))
    })
    .await;

    let session = parent.manager.create_session(GUILD, VOICE, TEXT).await.unwrap();
    assert_eq!(session.location(), Location::Remote("child-1".to_string()));
    session.play(U1, "A", None).await.unwrap();
    assert_eq!(child.engine.plays(GUILD), vec![("A".to_string(), 100)]);

    // The child tearing its session down by itself clears the mirror.
    child.manager.destroy_session(VOICE).await.unwrap();
    eventually(async || parent_manager.sessions().await.is_empty()).await;

    // Requests flow the other way too.
    let states = uplink.call(PeerCall::States).await.unwrap();
    assert_eq!(states.get("states"), Some(&json!([])));

    cancel.cancel();
}

#[tokio::test]
async fn unknown_operations_are_refused_distinctly() {
    let h = harness();
    let interop = Interop::new(h.manager.clone()).unwrap();

    let reply = interop.dispatch("dance", &Default::default()).await;
    assert_eq!(reply.get("status"), Some(&json!("NXOP")));

    let reply = interop
        .dispatch("volume", &serde_json::from_value(json!({"voice_id": 11})).unwrap())
        .await;
    assert_eq!(reply.get("status"), Some(&json!("MALFORMED")));
}
