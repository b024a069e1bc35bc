//! One POST per call against a peer's HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::{
    common::{HanabiError, HanabiResult},
    interop::{
        PeerCall, PeerTransport,
        envelope::{Payload, parse_http_reply},
    },
};

pub const STATES_PATH: &str = "/api/voice/states";

/// Short body keys used by every route, against operation-channel names.
const COMMON_KEYS: &[(&str, &str)] = &[
    ("gid", "guild_id"),
    ("vid", "voice_id"),
    ("cid", "channel_id"),
    ("uid", "requester"),
    ("query", "title"),
];

pub struct Route {
    pub path: &'static str,
    pub op: &'static str,
    /// Route-specific key renames, body key first.
    pub keys: &'static [(&'static str, &'static str)],
}

const fn route(path: &'static str, op: &'static str) -> Route {
    Route { path, op, keys: &[] }
}

pub const ROUTES: &[Route] = &[
    route("/api/voice/connect", "connect"),
    route("/api/voice/disconnect", "disconnect"),
    route("/api/voice/play", "play"),
    route("/api/voice/pause", "pause"),
    route("/api/voice/volume", "volume"),
    route("/api/voice/stop", "stop"),
    Route { path: "/api/voice/move/to", op: "skip", keys: &[("position", "to")] },
    Route { path: "/api/voice/move/by", op: "skip", keys: &[("positions", "by")] },
    route("/api/voice/repeat", "repeat-mode"),
    route("/api/voice/enqueue", "enqueue"),
    route("/api/voice/dequeue", "dequeue"),
    route("/api/voice/queue", "display-queue"),
    route("/api/voice/playback", "display-playback"),
    route("/api/session/delete", "delete"),
    route("/api/bot/kill", "shutdown"),
    route("/api/bot/reinit", "reinit"),
    Route { path: "/api/bot/init", op: "init-complete", keys: &[("name", "child_name")] },
];

impl Route {
    pub fn find(path: &str) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.path == path)
    }

    fn renames(&self) -> impl Iterator<Item = &(&'static str, &'static str)> {
        self.keys.iter().chain(COMMON_KEYS)
    }

    /// A POST body under operation-channel names.
    pub fn to_args(&self, mut body: Payload) -> Payload {
        for (short, long) in self.renames() {
            if let Some(value) = body.remove(*short) {
                body.entry(long.to_string()).or_insert(value);
            }
        }
        body
    }

    fn to_body(&self, mut args: Payload) -> Payload {
        for (short, long) in self.renames() {
            if let Some(value) = args.remove(*long) {
                args.insert(short.to_string(), value);
            }
        }
        args.retain(|_, v| !v.is_null());
        args
    }
}

/// Path and body for `call`. `None` for the body means GET.
pub fn request_for(call: &PeerCall) -> HanabiResult<(&'static str, Option<Payload>)> {
    let path = match call {
        // Peers without a channel answer heartbeats through the states probe.
        PeerCall::Heartbeat { .. } | PeerCall::States => return Ok((STATES_PATH, None)),
        PeerCall::Skip { to: Some(_), .. } => "/api/voice/move/to",
        PeerCall::Skip { .. } => "/api/voice/move/by",
        other => ROUTES
            .iter()
            .find(|r| r.op == other.op())
            .map(|r| r.path)
            .ok_or_else(|| {
                HanabiError::MalformedRequest(format!("`{}` has no HTTP route", other.op()))
            })?,
    };
    let route = Route::find(path)
        .ok_or_else(|| HanabiError::MalformedRequest(format!("unknown route {}", path)))?;
    Ok((path, Some(route.to_body(call.args()))))
}

pub struct HttpTransport {
    base: String,
    password: String,
    http: reqwest::Client,
}

fn map_http_err(e: reqwest::Error) -> HanabiError {
    if e.is_timeout() {
        HanabiError::Timeout(format!("peer: {}", e))
    } else {
        HanabiError::Transport(e.to_string())
    }
}

impl HttpTransport {
    pub fn new(base: impl Into<String>, password: impl Into<String>, timeout: Duration) -> HanabiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HanabiError::Transport(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            password: password.into(),
            http,
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn call(&self, call: PeerCall) -> HanabiResult<Payload> {
        let (path, body) = request_for(&call)?;
        let url = format!("{}{}", self.base, path);
        debug!("POST {} ({})", url, call.op());

        let request = match body {
            Some(body) => self.http.post(&url).json(&body),
            None => self.http.get(&url),
        };
        let response = request
            .header("Authorization", &self.password)
            .send()
            .await
            .map_err(map_http_err)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(HanabiError::Transport(format!(
                "{} rejected our credentials",
                self.base
            )));
        }

        match response.json::<Value>().await {
            Ok(Value::Object(body)) => parse_http_reply(body),
            Ok(other) => Err(HanabiError::BadResponse(format!(
                "expected an object, got {}",
                other
            ))),
            Err(e) if e.is_timeout() => Err(map_http_err(e)),
            Err(e) => Err(HanabiError::BadResponse(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.base)
    }
}
