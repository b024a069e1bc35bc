//! The persistent operation channel.
//!
//! One WebSocket per peer, dialled by the peer. Either end may send
//! requests (`{"op", "nonce", ...}`) and each request gets exactly one reply
//! (`{"nonce", "status", ...}`). Frames without `op` are replies.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::HeaderValue, protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    common::{Backoff, HanabiError, HanabiResult},
    interop::{
        PeerCall, PeerTransport,
        envelope::{Payload, channel_reply, http_reply, no_such_op, parse_channel_reply},
        http::Route,
        ops::{OpTable, SchemaError},
    },
    manager::SessionManager,
};

/// One live connection: outbound frames plus the requests awaiting replies.
pub struct OpChannel {
    remote: String,
    outbound: flume::Sender<String>,
    pending: DashMap<String, oneshot::Sender<Payload>>,
    timeout: Duration,
}

impl OpChannel {
    /// The receiver yields serialised frames for the socket writer.
    pub fn new(remote: impl Into<String>, timeout: Duration) -> (Arc<Self>, flume::Receiver<String>) {
        let (outbound, frames) = flume::unbounded();
        let link = Arc::new(Self {
            remote: remote.into(),
            outbound,
            pending: DashMap::new(),
            timeout,
        });
        (link, frames)
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub async fn request(&self, call: &PeerCall) -> HanabiResult<Payload> {
        let nonce = Uuid::new_v4().to_string();
        let mut frame = call.args();
        frame.insert("op".to_string(), Value::from(call.op()));
        frame.insert("nonce".to_string(), Value::from(nonce.as_str()));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(nonce.clone(), tx);
        if let Err(e) = self.send(frame) {
            self.pending.remove(&nonce);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => parse_channel_reply(reply),
            Ok(Err(_)) => Err(HanabiError::Transport(format!(
                "channel to {} closed before `{}` was answered",
                self.remote,
                call.op()
            ))),
            Err(_) => {
                self.pending.remove(&nonce);
                Err(HanabiError::Timeout(format!(
                    "`{}` on {} after {:?}",
                    call.op(),
                    self.remote,
                    self.timeout
                )))
            }
        }
    }

    pub fn send(&self, frame: Payload) -> HanabiResult<()> {
        let text = serde_json::to_string(&frame)
            .map_err(|e| HanabiError::Transport(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|_| HanabiError::Transport(format!("channel to {} is closed", self.remote)))
    }

    /// Hands a reply to whoever is waiting on its nonce. Replies nobody waits
    /// for any more (timed out) are dropped.
    fn resolve(&self, mut reply: Payload) {
        let nonce = match reply.remove("nonce") {
            Some(Value::String(nonce)) => nonce,
            _ => {
                let reply = serde_json::Value::Object(reply);
                warn!("Reply from {} without a nonce: {}", self.remote, reply);
                return;
            }
        };
        match self.pending.remove(&nonce) {
            Some((_, waiter)) => {
                let _ = waiter.send(reply);
            }
            None => debug!("Discarding late reply {} from {}", nonce, self.remote),
        }
    }

    /// Fails every outstanding request.
    pub fn close(&self) {
        self.pending.clear();
    }
}

/// Runs received operations against the local session manager.
pub struct Interop {
    ops: OpTable,
    manager: Arc<SessionManager>,
}

impl Interop {
    pub fn new(manager: Arc<SessionManager>) -> Result<Self, SchemaError> {
        Ok(Self {
            ops: OpTable::standard()?,
            manager,
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// `None` when `op` is not a known operation.
    async fn run(&self, op: &str, raw: &Payload) -> Option<HanabiResult<Payload>> {
        let args = match self.ops.coerce(op, raw)? {
            Ok(args) => args,
            Err(e) => return Some(Err(e)),
        };
        let call = match PeerCall::decode(op, &args) {
            Ok(call) => call,
            Err(e) => return Some(Err(e)),
        };
        debug!("Executing `{}` for a peer", op);
        Some(call.execute(&self.manager).await)
    }

    /// Reply to one operation-channel request, nonce not included.
    pub async fn dispatch(&self, op: &str, raw: &Payload) -> Payload {
        match self.run(op, raw).await {
            Some(result) => {
                if let Err(e) = &result {
                    debug!("`{}` failed: {}", op, e);
                }
                channel_reply(result)
            }
            None => {
                warn!("Peer requested unknown operation `{}`", op);
                no_such_op(op)
            }
        }
    }

    /// Reply to one POST against `route`.
    pub async fn dispatch_route(&self, route: &Route, body: Payload) -> Payload {
        let args = route.to_args(body);
        match self.run(route.op, &args).await {
            Some(result) => http_reply(result),
            None => http_reply(Err(HanabiError::MalformedRequest(format!(
                "`{}` is not an operation",
                route.op
            )))),
        }
    }

    /// Handles one inbound text frame on `link`. Requests run on their own
    /// task so a handler can itself wait on replies arriving on this link.
    pub fn handle_frame(self: &Arc<Self>, link: &Arc<OpChannel>, text: &str) {
        let frame: Payload = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Unparseable frame from {}: {}", link.remote(), e);
                return;
            }
        };

        let Some(op) = frame.get("op").and_then(Value::as_str).map(str::to_string) else {
            link.resolve(frame);
            return;
        };

        let interop = self.clone();
        let link = link.clone();
        tokio::spawn(async move {
            let mut reply = interop.dispatch(&op, &frame).await;
            if let Some(nonce) = frame.get("nonce") {
                reply.insert("nonce".to_string(), nonce.clone());
            }
            if let Err(e) = link.send(reply) {
                debug!("Could not answer `{}`: {}", op, e);
            }
        });
    }
}

/// Calls over whatever channel a fleet member currently has open.
pub struct ChannelTransport {
    remote: String,
    link: RwLock<Option<Arc<OpChannel>>>,
}

impl ChannelTransport {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            link: RwLock::new(None),
        }
    }

    pub fn attach(&self, link: Arc<OpChannel>) {
        if let Some(old) = self.link.write().replace(link) {
            info!("Channel to {} replaced", self.remote);
            old.close();
        }
    }

    /// Drops `link` unless a newer connection already replaced it.
    pub fn detach(&self, link: &Arc<OpChannel>) {
        let mut current = self.link.write();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, link)) {
            *current = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.read().is_some()
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn call(&self, call: PeerCall) -> HanabiResult<Payload> {
        let link = self.link.read().clone().ok_or_else(|| {
            HanabiError::Transport(format!("no channel to {} is open", self.remote))
        })?;
        link.request(&call).await
    }

    fn describe(&self) -> String {
        format!("channel {}", self.remote)
    }
}

/// A peer's side of the channel: dials the coordinator, announces itself,
/// serves its requests and redials on loss.
pub struct ChannelClient {
    url: String,
    password: String,
    name: String,
    timeout: Duration,
    max_attempts: u32,
    transport: Arc<ChannelTransport>,
    interop: Arc<Interop>,
    cancel: CancellationToken,
}

impl ChannelClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        timeout: Duration,
        max_attempts: u32,
        transport: Arc<ChannelTransport>,
        interop: Arc<Interop>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url: url.into(),
            password: password.into(),
            name: name.into(),
            timeout,
            max_attempts,
            transport,
            interop,
            cancel,
        }
    }

    pub async fn run(self) {
        let mut backoff = Backoff::new(self.max_attempts);

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect(&mut backoff).await {
                Ok(()) if self.cancel.is_cancelled() => {
                    debug!("Coordinator channel shutting down cleanly");
                    return;
                }
                Ok(()) => info!("Coordinator closed the channel"),
                Err(e) => warn!("Coordinator channel error: {}", e),
            }

            if backoff.is_exhausted() {
                error!("Coordinator unreachable after {} attempts", self.max_attempts);
                return;
            }
            let delay = backoff.next();
            info!("Redialling the coordinator in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self, backoff: &mut Backoff) -> HanabiResult<()> {
        let transport_err = |e: &dyn std::fmt::Display| HanabiError::Transport(e.to_string());
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| transport_err(&e))?;
        let headers = request.headers_mut();
        let header = |value: &str| HeaderValue::from_str(value).map_err(|e| transport_err(&e));
        headers.insert("Authorization", header(&self.password)?);
        headers.insert("Client-Name", header(&self.name)?);

        debug!("Connecting to coordinator: {}", self.url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| transport_err(&e))?;
        let (mut write, mut read) = ws_stream.split();
        backoff.reset();

        let (link, frames) = OpChannel::new("coordinator", self.timeout);
        self.transport.attach(link.clone());
        info!("Connected to coordinator at {}", self.url);

        let announce = {
            let link = link.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                match link.request(&PeerCall::InitComplete { name }).await {
                    Ok(_) => info!("Announced to the coordinator"),
                    Err(e) => warn!("Coordinator did not take our announcement: {}", e),
                }
            })
        };

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
                frame = frames.recv_async() => {
                    let Ok(frame) = frame else { break Ok(()) };
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        break Err(transport_err(&e));
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => break Err(transport_err(&e)),
                        None => break Ok(()),
                    };
                    match msg {
                        Message::Text(text) => self.interop.handle_frame(&link, text.as_str()),
                        Message::Close(frame) => {
                            debug!("Coordinator closed the socket: {:?}", frame);
                            break Ok(());
                        }
                        _ => {}
                    }
                }
            }
        };

        announce.abort();
        self.transport.detach(&link);
        link.close();
        result
    }
}
