use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use tracing::{error, info, warn};

use crate::{
    interop::{ChannelTransport, OpChannel},
    transport::AppState,
};

/// Upgrade for a peer's operation channel. Authorization is checked by the
/// router middleware; the `Client-Name` header must name a channel peer.
pub async fn websocket_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, (StatusCode, &'static str)> {
    let name = headers
        .get("client-name")
        .and_then(|h| h.to_str().ok())
        .map(String::from)
        .ok_or((StatusCode::BAD_REQUEST, "Missing Client-Name header"))?;

    let transport = state
        .interop
        .manager()
        .peer(&name)
        .and_then(|peer| peer.channel().cloned());
    let Some(transport) = transport else {
        warn!("Rejected operation channel from unknown peer `{}`", name);
        return Err((StatusCode::FORBIDDEN, "Unknown peer"));
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, name, transport)))
}

pub async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    name: String,
    transport: Arc<ChannelTransport>,
) {
    let (link, frames) = OpChannel::new(name.clone(), state.rpc_timeout);
    transport.attach(link.clone());
    info!("Operation channel opened: peer={}", name);

    loop {
        tokio::select! {
            Ok(frame) = frames.recv_async() => {
                if let Err(e) = socket.send(Message::Text(frame.into())).await {
                    error!("Socket send error: peer={} err={}", name, e);
                    break;
                }
            }
            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket error: peer={} err={}", name, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => state.interop.handle_frame(&link, text.as_str()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    transport.detach(&link);
    link.close();
    // Skipped by placement until it announces itself again. A newer link
    // from the same peer keeps it alive.
    if !transport.is_connected() {
        if let Some(peer) = state.interop.manager().peer(&name) {
            peer.mark_dead();
        }
    }
    info!("Operation channel closed: peer={}", name);
}
