//! Typed identifiers for accounts and devices.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `Display` with a semantic prefix (e.g., `aci:1c17…`)
/// - `new()`/`random()` constructors and an `as_uuid()` accessor
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates an identifier from a raw UUID.
            #[inline]
            pub const fn new(value: Uuid) -> Self {
                Self(value)
            }

            /// Creates a fresh random (v4) identifier.
            #[inline]
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the raw UUID.
            #[inline]
            pub const fn as_uuid(self) -> Uuid {
                self.0
            }

            /// True for the all-zero placeholder value.
            #[inline]
            pub fn is_nil(self) -> bool {
                self.0.is_nil()
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<Uuid>().map(Self)
            }
        }
    };
}

define_uuid_id!(
    /// Account identifier: the stable per-identity id.
    ///
    /// Assigned at first registration and never reassigned to a different
    /// identity afterwards; a re-registration within the tombstone window
    /// reclaims the same value.
    ///
    /// # Display
    ///
    /// Formats with `aci:` prefix: `aci:67e55044-…`.
    Aci, "aci"
);

define_uuid_id!(
    /// Phone-number identifier: a distinct id tied to the current phone
    /// number.
    ///
    /// Allocated by the phone-number-identifier directory and replaced when
    /// the account's number changes.
    ///
    /// # Display
    ///
    /// Formats with `pni:` prefix: `pni:93b885ad-…`.
    Pni, "pni"
);

/// Identifier of a device within an account.
///
/// The primary device is always [`DeviceId::PRIMARY`]; secondary devices get
/// the next free id above it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    /// The distinguished primary device.
    pub const PRIMARY: DeviceId = DeviceId(1);

    /// Creates a device id from a raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw numeric value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the next id in sequence.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}
