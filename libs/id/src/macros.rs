//! Id-type generators.
//!
//! Both macros expand to a `Copy` newtype. The parsing logic lives in plain
//! functions below so the expansions stay small.

use crate::{IdError, Ulid};

#[doc(hidden)]
pub fn parse_prefixed(s: &str, expected: &'static str) -> Result<Ulid, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    let (prefix, rest) = s.split_once('_').ok_or(IdError::MissingSeparator)?;
    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_owned(),
        });
    }
    Ulid::from_string(rest).map_err(|e| IdError::InvalidUlid(e.to_string()))
}

#[doc(hidden)]
pub fn parse_sequence(s: &str) -> Result<u64, IdError> {
    match s {
        "" => Err(IdError::Empty),
        digits => digits
            .parse()
            .map_err(|_| IdError::InvalidSequence(digits.to_owned())),
    }
}

/// `define_id!(HistoryId, "oph")` declares an id rendered as `oph_<ulid>`.
///
/// Serde goes through the string form, so a wrong prefix fails to
/// deserialize.
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $crate::macros::parse_prefixed(s, Self::PREFIX).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(Self::PREFIX)?;
                f.write_str("_")?;
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
                ser.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
                let raw = <String as serde::Deserialize>::deserialize(de)?;
                Self::parse(&raw).map_err(<D::Error as serde::de::Error>::custom)
            }
        }
    };
}

/// `define_seq_id!(ResourceId)` declares a `u64` id that prints and
/// serializes as the bare number. Values come from a
/// [`Sequence`](crate::Sequence).
#[macro_export]
macro_rules! define_seq_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $crate::macros::parse_sequence(s).map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}
