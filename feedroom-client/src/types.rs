//! Common identifier types used throughout the client
//!
//! The gateway reports room and feed identifiers either as JSON numbers or as
//! strings (depending on how the room was configured). Both are normalised to a
//! string internally and written back as a number whenever they look numeric.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.0.parse::<u64>() {
                    Ok(n) => serializer.serialize_u64(n),
                    Err(_) => serializer.serialize_str(&self.0),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Ok(Self(WireId::deserialize(deserializer)?.into_string()))
            }
        }
    };
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

wire_id!(
    /// Identity of a publisher in the room (remote feeds and our own publisher id)
    FeedId
);

wire_id!(
    /// Opaque room selector supplied by the caller
    RoomId
);

wire_id!(
    /// Identity of a single media track
    TrackId
);

/// Media line identifier (`mid`) within a negotiated connection
pub type MediaLine = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_round_trip_as_numbers() {
        let id: FeedId = serde_json::from_str("7").unwrap();
        assert_eq!(id, FeedId::from(7));
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
    }

    #[test]
    fn test_text_ids_stay_strings() {
        let id: RoomId = serde_json::from_str("\"lobby\"").unwrap();
        assert_eq!(id.as_str(), "lobby");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lobby\"");
    }

    #[test]
    fn test_numeric_string_matches_number() {
        let a: FeedId = serde_json::from_str("\"12\"").unwrap();
        let b: FeedId = serde_json::from_str("12").unwrap();
        assert_eq!(a, b);
    }
}
