//! Identifier newtypes.
//!
//! Sessions, users, offers, and connections each get their own string-backed
//! ID type so the compiler catches a swapped argument long before a map
//! lookup would. Freshly minted IDs are UUID v7, which keeps them sortable by
//! creation time; externally supplied values (user names from the embedding
//! application, for instance) pass through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh time-ordered ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Borrow the raw identifier.
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_type! {
    /// A match session.
    SessionId
}

id_type! {
    /// A participant. Supplied by the embedding application, never minted
    /// here.
    UserId
}

id_type! {
    /// A single negotiation offer. Reissuing an expired offer mints a new
    /// one.
    OfferId
}

id_type! {
    /// One live socket binding. A user reconnecting on a new device gets a
    /// new one; reattaching a dropped transport keeps the old one.
    ConnectionId
}
