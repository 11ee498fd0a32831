//! Branded ID newtypes for type safety.
//!
//! Each identifier the relay mints is a newtype around `String` carrying a
//! short type prefix followed by a UUID v7 (time-ordered), e.g.
//! `conn_0190c3a2-...`. Workspace, user and device identifiers come from the
//! caller and stay plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// ID prefix.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a persisted workspace event.
    EventId, "evt"
}

branded_id! {
    /// Unique identifier for a device presence record.
    SessionId, "dev"
}

branded_id! {
    /// Unique identifier for one live connection. A device gets a fresh one
    /// on every connect; it is never reused.
    ConnectionId, "conn"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid_part(id: &str) -> Uuid {
        let (_, rest) = id.split_once('_').expect("prefixed id");
        Uuid::parse_str(rest).expect("should be valid UUID")
    }

    #[test]
    fn event_id_is_prefixed_uuid_v7() {
        let id = EventId::new();
        assert!(id.starts_with("evt_"));
        assert_eq!(uuid_part(&id).get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn session_id_prefix() {
        assert!(SessionId::new().starts_with("dev_"));
    }

    #[test]
    fn connection_id_prefix() {
        let id = ConnectionId::new();
        assert!(id.starts_with(ConnectionId::PREFIX));
        assert_eq!(uuid_part(&id).get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_ref() {
        let id = ConnectionId::from("conn_abc");
        assert_eq!(id.as_str(), "conn_abc");
    }

    #[test]
    fn display_and_into_string() {
        let id = EventId::from("evt_x");
        assert_eq!(format!("{id}"), "evt_x");
        let s: String = id.into();
        assert_eq!(s, "evt_x");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ConnectionId::from("conn_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_1\"");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
