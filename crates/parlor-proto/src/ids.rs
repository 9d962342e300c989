//! Identifiers.
//!
//! Users and rooms are named by the strings clients already know ("u1",
//! "general"). Message ids are 128-bit random values rendered as 32 lowercase
//! hex digits. All three serialize as plain CBOR text strings.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an owned string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable user identifier taken from the identity claim.
    UserId
);

string_id!(
    /// Room identifier from server configuration.
    RoomId
);

string_id!(
    /// Globally unique message identifier.
    MessageId
);

impl MessageId {
    /// Render 128 random bits as 32 hex digits.
    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self(format!("{value:032x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_fixed_width_hex() {
        assert_eq!(MessageId::from_u128(0xAB).as_str(), "000000000000000000000000000000ab");
        assert_eq!(MessageId::from_u128(u128::MAX).as_str().len(), 32);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&RoomId::from("general"), &mut buf).unwrap();

        let text: String = ciborium::de::from_reader(&buf[..]).unwrap();
        assert_eq!(text, "general");
    }
}
