//! Condensed hash newtypes.
//!
//! The ledger's native hash alphabet is variable-width; on the wire and on
//! disk every 81-character hash condenses to exactly 49 bytes, and every
//! 27-character tag to 17 bytes. These newtypes carry the condensed form
//! only; expansion back to the native alphabet happens at the API edge,
//! outside this workspace.

use std::fmt;

use crate::error::TypeError;

/// Byte width of a condensed transaction/bundle/address hash.
pub const HASH_LEN: usize = 49;

/// Byte width of a condensed tag.
pub const TAG_LEN: usize = 17;

macro_rules! condensed {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Wrap a pre-condensed byte array.
            pub const fn from_array(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Construct from a byte slice, checking the length.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
                if bytes.len() != $len {
                    return Err(TypeError::InvalidLength {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(bytes);
                Ok(Self(arr))
            }

            /// The all-zero value. Represents "not set".
            pub const fn null() -> Self {
                Self([0u8; $len])
            }

            /// Returns `true` if this is the all-zero value.
            pub fn is_null(&self) -> bool {
                self.0 == [0u8; $len]
            }

            /// The raw condensed bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Hex-encoded string representation.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Short hex representation (first 8 characters).
            pub fn short_hex(&self) -> String {
                hex::encode(&self.0[..4])
            }

            /// Parse from a hex string.
            pub fn from_hex(s: &str) -> Result<Self, TypeError> {
                let bytes =
                    hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
                Self::from_bytes(&bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.short_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                struct Visitor;

                impl<'de> serde::de::Visitor<'de> for Visitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a {}-byte condensed hash", $len)
                    }

                    fn visit_str<E: serde::de::Error>(
                        self,
                        v: &str,
                    ) -> Result<Self::Value, E> {
                        $name::from_hex(v).map_err(E::custom)
                    }

                    fn visit_bytes<E: serde::de::Error>(
                        self,
                        v: &[u8],
                    ) -> Result<Self::Value, E> {
                        $name::from_bytes(v).map_err(E::custom)
                    }
                }

                if deserializer.is_human_readable() {
                    deserializer.deserialize_str(Visitor)
                } else {
                    deserializer.deserialize_bytes(Visitor)
                }
            }
        }
    };
}

condensed!(
    /// Condensed hash identifying a single transaction.
    TxHash,
    HASH_LEN
);

condensed!(
    /// Condensed hash shared by every transaction of one bundle.
    ///
    /// Distinct from the tail transaction hash: reattachments of the same
    /// logical transfer share a `BundleHash` but have different tails.
    BundleHash,
    HASH_LEN
);

condensed!(
    /// Condensed ledger address.
    Address,
    HASH_LEN
);

condensed!(
    /// Condensed transaction tag.
    Tag,
    TAG_LEN
);
