//! Branded ID newtypes for type safety.
//!
//! Connections and per-operation requests get distinct ID types implemented
//! as newtype wrappers around `String`, generated as UUID v7 (time-ordered)
//! via [`uuid::Uuid::now_v7`]. Client-assigned operation ids stay plain
//! strings since the client controls their format.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), new_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
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
    };
}

branded_id!(
    /// Identifies one physical transport session.
    ConnectionId,
    "conn"
);

branded_id!(
    /// Opaque identifier attached to every execution call (`subscribe`/`exec`).
    ///
    /// Unique per call, so collaborators can correlate logs or side effects
    /// with a single operation.
    RequestId,
    "req"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_carry_prefix() {
        assert!(ConnectionId::new().as_str().starts_with("conn_"));
        assert!(RequestId::new().as_str().starts_with("req_"));
    }

    #[test]
    fn display_matches_inner() {
        let id = RequestId::from("req_fixed".to_string());
        assert_eq!(id.to_string(), "req_fixed");
        assert_eq!(id.as_ref(), "req_fixed");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ConnectionId::from("conn_1".to_string());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_1\"");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let first = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = RequestId::new();
        assert!(first.as_str() < second.as_str());
    }
}
