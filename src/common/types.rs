use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

/// A thread-safe, mutually exclusive shared component.
pub type Shared<T> = Arc<Mutex<T>>;

/// A thread-safe, read-write shared component.
pub type SharedRw<T> = Arc<RwLock<T>>;

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Declares a transparent Discord snowflake newtype.
macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_snowflake(deserializer).map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(u: u64) -> Self {
                Self(u)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }
    };
}

/// Discord and Lavalink send snowflakes as strings, peers send them as numbers.
fn deserialize_snowflake<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match <Raw as serde::Deserialize>::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

snowflake!(
    /// A guild (server) identity. At most one local session exists per guild per process.
    GuildId
);
snowflake!(
    /// A voice channel identity. At most one session exists per voice channel fleet-wide.
    VoiceId
);
snowflake!(
    /// A text channel identity, used for status messages.
    ChannelId
);
snowflake!(UserId);
snowflake!(MessageId);

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&VoiceId(10)).unwrap();
        assert_eq!(json, "10");
        let back: GuildId = serde_json::from_str("123456789012345678").unwrap();
        assert_eq!(back, GuildId(123456789012345678));
        let quoted: GuildId = serde_json::from_str("\"987\"").unwrap();
        assert_eq!(quoted, GuildId(987));
    }

    #[test]
    fn snowflakes_parse_from_strings() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
        assert!("abc".parse::<ChannelId>().is_err());
    }
}
