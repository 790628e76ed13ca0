// File: src/memory/core/ids.rs

//! Identifier types for the knowledge graph.
//!
//! This module is intentionally **type-heavy** and **logic-light**.
//! It provides strongly-typed ID newtypes (compile-time safety) and
//! helpers for generation, parsing, and formatting.
//!
//! ## Partitioning
//! Every graph read and write is scoped by a [`GroupId`]. The id is threaded
//! explicitly through every store, pipeline, and tool call; nothing in the crate
//! reads a shared partition constant.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
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
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a `MemoryObject` (graph node).
    ObjectId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of a `MemoryLink` (graph edge).
    LinkId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of one ingestion call; recorded in link `sources`.
    EpisodeId,
    generator = uuid_time_ordered
);

// ===== Group IDs ============================================================

/// Errors returned when parsing/validating a [`GroupId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains a disallowed character.
    InvalidChar {
        /// The invalid character.
        ch: char,
        /// The index where it was found.
        index: usize,
    },
}

impl fmt::Display for GroupIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "group id must not be empty"),
            Self::TooLong { max, got } => write!(f, "group id too long: got {got}, max {max}"),
            Self::InvalidChar { ch, index } => {
                write!(
                    f,
                    "group id contains invalid character {ch:?} at index {index}"
                )
            }
        }
    }
}

impl std::error::Error for GroupIdError {}

/// Tenant / partition key scoping all graph reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Hard ceiling to prevent pathological payloads.
    pub const MAX_LEN: usize = 128;

    /// Build a validated `GroupId`.
    ///
    /// Rules:
    /// - Non-empty after trimming.
    /// - Max length limited.
    /// - Conservative ASCII set: `[A-Za-z0-9._:-]`.
    ///
    /// # Errors
    /// Returns `GroupIdError` if the input is empty, too long, or contains invalid characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, GroupIdError> {
        let s = raw.as_ref().trim();

        if s.is_empty() {
            return Err(GroupIdError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(GroupIdError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }

        for (i, ch) in s.chars().enumerate() {
            let ok = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | ':' | '-');
            if !ok {
                return Err(GroupIdError::InvalidChar { ch, index: i });
            }
        }

        Ok(Self(s.to_owned()))
    }

    /// The partition used when nothing else is configured.
    #[must_use]
    pub fn default_partition() -> Self {
        Self("default".to_owned())
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupId {
    type Err = GroupIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<GroupId> for String {
    fn from(value: GroupId) -> Self {
        value.0
    }
}

impl TryFrom<String> for GroupId {
    type Error = GroupIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{EpisodeId, GroupId, LinkId, ObjectId};

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    fn uuid_from_text(t: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }

    macro_rules! impl_rusqlite_uuid_newtype {
        ($t:ty) => {
            impl ToSql for $t {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
                }
            }

            impl FromSql for $t {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    match value {
                        ValueRef::Text(t) => uuid_from_text(t).map(Self),
                        _ => Err(FromSqlError::InvalidType),
                    }
                }
            }
        };
    }

    impl_rusqlite_uuid_newtype!(ObjectId);
    impl_rusqlite_uuid_newtype!(LinkId);
    impl_rusqlite_uuid_newtype!(EpisodeId);

    impl ToSql for GroupId {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(ToSqlOutput::Owned(Value::Text(self.as_str().to_owned())))
        }
    }

    impl FromSql for GroupId {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            match value {
                ValueRef::Text(t) => {
                    let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                    Self::new(s).map_err(|e| FromSqlError::Other(Box::new(e)))
                }
                _ => Err(FromSqlError::InvalidType),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_round_trips_through_string() {
        let id = ObjectId::new();
        let parsed: ObjectId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn group_id_rejects_empty_and_invalid() {
        assert_eq!(GroupId::new("   "), Err(GroupIdError::Empty));
        assert!(matches!(
            GroupId::new("team alpha"),
            Err(GroupIdError::InvalidChar { ch: ' ', index: 4 })
        ));
        let long = "a".repeat(GroupId::MAX_LEN + 1);
        assert!(matches!(GroupId::new(long), Err(GroupIdError::TooLong { .. })));
    }

    #[test]
    fn group_id_trims_and_keeps_value() {
        let group = GroupId::new("  default-group ").unwrap();
        assert_eq!(group.as_str(), "default-group");
    }

    #[test]
    fn group_id_deserialization_validates() {
        let ok: GroupId = serde_json::from_str("\"tenant-1\"").unwrap();
        assert_eq!(ok.as_str(), "tenant-1");
        assert!(serde_json::from_str::<GroupId>("\"bad id\"").is_err());
    }
}
