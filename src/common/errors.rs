use thiserror::Error;

/// Generic reply for failures the user can do nothing about.
pub const MAINTAINER_REPLY: &str =
    "Something went wrong while processing this request. Please contact my maintainer.";

/// Every failure the session layer can surface, local or remote.
///
/// Peers serialise these into status envelopes and callers rebuild the same
/// variant, so code above the session manager never needs to know whether a
/// session lives on this process or another one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HanabiError {
    #[error("There is no active session for this channel.")]
    NoSessionExists,
    #[error("A session already exists for this channel.")]
    SessionAlreadyExists,
    #[error("No session can be created here right now. Try again later.")]
    NotAvailable,
    #[error("All sessions are currently busy. Try again later.")]
    AllSessionsBusy,
    #[error("`{0}` is not a known session name.")]
    InvalidName(String),
    #[error("{0}")]
    InvalidPosition(String),
    #[error("{0}")]
    InvalidSetting(String),
    #[error("Nothing is playing right now.")]
    NothingPlaying,
    #[error("The playlist `{0}` does not exist.")]
    PlaylistNotFound(String),
    #[error("The playlist `{0}` is private.")]
    PlaylistPrivate(String),
    #[error("No tracks were found for `{0}`.")]
    TrackNotFound(String),

    #[error("bad response from peer: {0}")]
    BadResponse(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("peer failed to handle the request: {0}")]
    PeerFailure(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("audio engine error: {0}")]
    Engine(String),
    #[error("voice gateway error: {0}")]
    Gateway(String),
    #[error("chat error: {0}")]
    Chat(String),
    #[error("store error: {0}")]
    Store(String),
}

pub type HanabiResult<T> = std::result::Result<T, HanabiError>;

impl HanabiError {
    /// Recoverable errors are reported to the user verbatim.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoSessionExists
                | Self::SessionAlreadyExists
                | Self::NotAvailable
                | Self::AllSessionsBusy
                | Self::InvalidName(_)
                | Self::InvalidPosition(_)
                | Self::InvalidSetting(_)
                | Self::NothingPlaying
                | Self::PlaylistNotFound(_)
                | Self::PlaylistPrivate(_)
                | Self::TrackNotFound(_)
        )
    }

    /// The chat reply for this error. Unrecoverable errors are logged and
    /// answered generically.
    pub fn user_message(&self) -> String {
        if self.is_recoverable() {
            self.to_string()
        } else {
            tracing::error!("Unrecoverable session error: {}", self);
            MAINTAINER_REPLY.to_string()
        }
    }

    pub fn position(message: impl Into<String>) -> Self {
        Self::InvalidPosition(message.into())
    }

    pub fn setting(message: impl Into<String>) -> Self {
        Self::InvalidSetting(message.into())
    }
}
