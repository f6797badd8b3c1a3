//! Branded ID newtypes for type safety.
//!
//! Every persisted entity has a distinct ID type wrapping a `String`, so a
//! worldline ID can never be passed where an event ID is expected. Freshly
//! generated IDs carry a short type prefix followed by a UUID v7, which keeps
//! them time-ordered and recognizable in logs (`evt_0190…`, `wl_0190…`).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for freshly generated IDs.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (prefixed UUID v7, time-ordered).
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
    /// Unique identifier for a persisted event.
    EventId => "evt"
}

branded_id! {
    /// Unique identifier for a worldline (one branchable head-pointer chain).
    WorldlineId => "wl"
}

branded_id! {
    /// Unique identifier for a thread grouping worldlines.
    ThreadId => "thr"
}

branded_id! {
    /// Unique identifier for a background chat job.
    JobId => "job"
}

branded_id! {
    /// Unique identifier for a tool call within a turn.
    CallId => "call"
}

branded_id! {
    /// Unique identifier for one turn (planning through completion).
    TurnId => "turn"
}

branded_id! {
    /// Unique identifier for a produced artifact.
    ArtifactId => "art"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
