//! Outcome tags shared by both transports.
//!
//! Every `HanabiError` maps onto exactly one `Status`. The side executing a
//! call turns its result into a tag plus an optional message, and the calling
//! side rebuilds the same error from them.

use serde_json::{Map, Value};

use crate::common::{HanabiError, HanabiResult};

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    NoExistingSession,
    SessionExists,
    Unavailable,
    Busy,
    InvalidName,
    PositionError,
    SettingError,
    NothingPlaying,
    PlaylistNotFound,
    PlaylistPrivate,
    TrackNotFound,
    Malformed,
    NoSuchOp,
    Failure,
}

const ALL: [Status; 15] = [
    Status::Success,
    Status::NoExistingSession,
    Status::SessionExists,
    Status::Unavailable,
    Status::Busy,
    Status::InvalidName,
    Status::PositionError,
    Status::SettingError,
    Status::NothingPlaying,
    Status::PlaylistNotFound,
    Status::PlaylistPrivate,
    Status::TrackNotFound,
    Status::Malformed,
    Status::NoSuchOp,
    Status::Failure,
];

impl Status {
    /// Value of the `response` key in HTTP envelopes.
    pub fn http_tag(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoExistingSession => "NoExistingSession",
            Self::SessionExists => "SessionExists",
            Self::Unavailable => "NotAvailable",
            Self::Busy => "AllSessionsBusy",
            Self::InvalidName => "InvalidName",
            Self::PositionError => "PositionError",
            Self::SettingError => "SettingError",
            Self::NothingPlaying => "NothingPlaying",
            Self::PlaylistNotFound => "PlaylistNotFound",
            Self::PlaylistPrivate => "PlaylistPrivate",
            Self::TrackNotFound => "TrackNotFound",
            Self::Malformed => "Malformed",
            Self::NoSuchOp => "NoSuchOperation",
            Self::Failure => "Failure",
        }
    }

    /// Value of the `status` key in operation-channel replies.
    pub fn channel_tag(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoExistingSession => "NO_EXISTING_SESSION",
            Self::SessionExists => "SESSION_EXISTS",
            Self::Unavailable => "UNAVAILABLE",
            Self::Busy => "BUSY",
            Self::InvalidName => "INVALID_NAME",
            Self::PositionError => "POSITION_ERROR",
            Self::SettingError => "SETTING_ERROR",
            Self::NothingPlaying => "NOTHING_PLAYING",
            Self::PlaylistNotFound => "PLAYLIST_NOT_FOUND",
            Self::PlaylistPrivate => "PLAYLIST_PRIVATE",
            Self::TrackNotFound => "TRACK_NOT_FOUND",
            Self::Malformed => "MALFORMED",
            Self::NoSuchOp => "NXOP",
            Self::Failure => "FAILURE",
        }
    }

    pub fn from_http_tag(tag: &str) -> Option<Self> {
        // Older peers answer the states probe with "ACK".
        if tag == "ACK" {
            return Some(Self::Success);
        }
        ALL.into_iter().find(|s| s.http_tag() == tag)
    }

    pub fn from_channel_tag(tag: &str) -> Option<Self> {
        ALL.into_iter().find(|s| s.channel_tag() == tag)
    }

    /// The status and message describing `error` on the wire.
    pub fn of(error: &HanabiError) -> (Self, Option<String>) {
        use HanabiError as E;
        match error {
            E::NoSessionExists => (Self::NoExistingSession, None),
            E::SessionAlreadyExists => (Self::SessionExists, None),
            E::NotAvailable => (Self::Unavailable, None),
            E::AllSessionsBusy => (Self::Busy, None),
            E::InvalidName(m) => (Self::InvalidName, Some(m.clone())),
            E::InvalidPosition(m) => (Self::PositionError, Some(m.clone())),
            E::InvalidSetting(m) => (Self::SettingError, Some(m.clone())),
            E::NothingPlaying => (Self::NothingPlaying, None),
            E::PlaylistNotFound(m) => (Self::PlaylistNotFound, Some(m.clone())),
            E::PlaylistPrivate(m) => (Self::PlaylistPrivate, Some(m.clone())),
            E::TrackNotFound(m) => (Self::TrackNotFound, Some(m.clone())),
            E::MalformedRequest(m) => (Self::Malformed, Some(m.clone())),
            other => (Self::Failure, Some(other.to_string())),
        }
    }

    /// Rebuilds the caller-side outcome.
    pub fn into_result(self, message: Option<String>) -> HanabiResult<()> {
        use HanabiError as E;
        let message = message.unwrap_or_default();
        Err(match self {
            Self::Success => return Ok(()),
            Self::NoExistingSession => E::NoSessionExists,
            Self::SessionExists => E::SessionAlreadyExists,
            Self::Unavailable => E::NotAvailable,
            Self::Busy => E::AllSessionsBusy,
            Self::InvalidName => E::InvalidName(message),
            Self::PositionError => E::InvalidPosition(message),
            Self::SettingError => E::InvalidSetting(message),
            Self::NothingPlaying => E::NothingPlaying,
            Self::PlaylistNotFound => E::PlaylistNotFound(message),
            Self::PlaylistPrivate => E::PlaylistPrivate(message),
            Self::TrackNotFound => E::TrackNotFound(message),
            Self::Malformed => E::MalformedRequest(message),
            Self::NoSuchOp => E::BadResponse(format!("peer has no such operation: {}", message)),
            Self::Failure => E::PeerFailure(message),
        })
    }
}

/// Builds a reply object: `key: tag`, an optional `message`, then `payload`.
fn reply(key: &str, tag: &str, message: Option<String>, payload: Payload) -> Payload {
    let mut body = Payload::new();
    body.insert(key.to_string(), Value::from(tag));
    if let Some(message) = message {
        body.insert("message".to_string(), Value::from(message));
    }
    for (k, v) in payload {
        body.entry(k).or_insert(v);
    }
    body
}

/// Splits a reply into its outcome and payload. A missing or unknown tag is
/// a protocol violation.
fn parse(
    key: &str,
    mut body: Payload,
    from_tag: fn(&str) -> Option<Status>,
) -> HanabiResult<Payload> {
    let tag = match body.remove(key) {
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(HanabiError::BadResponse(format!(
                "`{}` is not a string: {}",
                key, other
            )));
        }
        None => {
            return Err(HanabiError::BadResponse(format!(
                "missing `{}` key in {}",
                key,
                Value::Object(body)
            )));
        }
    };
    let status = from_tag(&tag)
        .ok_or_else(|| HanabiError::BadResponse(format!("unknown status `{}`", tag)))?;
    let message = match body.remove("message") {
        Some(Value::String(message)) => Some(message),
        _ => None,
    };
    status.into_result(message)?;
    Ok(body)
}

pub fn http_reply(result: HanabiResult<Payload>) -> Payload {
    match result {
        Ok(payload) => reply("response", Status::Success.http_tag(), None, payload),
        Err(e) => {
            let (status, message) = Status::of(&e);
            reply("response", status.http_tag(), message, Payload::new())
        }
    }
}

pub fn parse_http_reply(body: Payload) -> HanabiResult<Payload> {
    parse("response", body, Status::from_http_tag)
}

pub fn channel_reply(result: HanabiResult<Payload>) -> Payload {
    match result {
        Ok(payload) => reply("status", Status::Success.channel_tag(), None, payload),
        Err(e) => {
            let (status, message) = Status::of(&e);
            reply("status", status.channel_tag(), message, Payload::new())
        }
    }
}

/// Reply sent for an operation name nobody registered.
pub fn no_such_op(op: &str) -> Payload {
    reply(
        "status",
        Status::NoSuchOp.channel_tag(),
        Some(op.to_string()),
        Payload::new(),
    )
}

pub fn parse_channel_reply(body: Payload) -> HanabiResult<Payload> {
    parse("status", body, Status::from_channel_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn tags_are_unique_per_transport() {
        for a in ALL {
            assert_eq!(Status::from_http_tag(a.http_tag()), Some(a));
            assert_eq!(Status::from_channel_tag(a.channel_tag()), Some(a));
        }
    }

    #[test]
    fn http_envelopes_keep_the_legacy_tags() {
        let ok = http_reply(Ok(Payload::new()));
        assert_eq!(Value::Object(ok), json!({"response": "success"}));

        let err = http_reply(Err(HanabiError::position("Values must be between `1` and `3`.")));
        assert_eq!(
            Value::Object(err),
            json!({"response": "PositionError", "message": "Values must be between `1` and `3`."})
        );

        let missing = http_reply(Err(HanabiError::NoSessionExists));
        assert_eq!(Value::Object(missing), json!({"response": "NoExistingSession"}));
    }

    #[test]
    fn missing_envelope_key_is_a_bad_response() {
        let err = parse_http_reply(object(json!({"status": "SUCCESS"}))).unwrap_err();
        assert!(matches!(err, HanabiError::BadResponse(_)));
        let err = parse_channel_reply(object(json!({"response": "success"}))).unwrap_err();
        assert!(matches!(err, HanabiError::BadResponse(_)));
    }

    #[test]
    fn errors_survive_the_channel() {
        let sent = HanabiError::PlaylistPrivate("mix".into());
        let back = parse_channel_reply(channel_reply(Err(sent.clone()))).unwrap_err();
        assert_eq!(back, sent);

        let unexpected = HanabiError::Engine("socket closed".into());
        let back = parse_channel_reply(channel_reply(Err(unexpected))).unwrap_err();
        assert_eq!(
            back,
            HanabiError::PeerFailure("audio engine error: socket closed".into())
        );
    }

    #[test]
    fn payload_rides_along_with_success() {
        let payload = object(json!({"action": "destroyed"}));
        let back = parse_channel_reply(channel_reply(Ok(payload.clone()))).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn unknown_operations_surface_as_bad_responses() {
        let err = parse_channel_reply(no_such_op("dance")).unwrap_err();
        assert!(matches!(err, HanabiError::BadResponse(m) if m.contains("dance")));
    }
}
