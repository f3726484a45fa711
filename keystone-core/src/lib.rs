//! Keystone Core - Schema Types
//!
//! Pure data types shared by every Keystone crate: class identifiers, column
//! positions, field types, the error hierarchy and configuration.
//! This crate contains no caching logic.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;

pub use config::SchemaConfig;
pub use error::{
    ArgumentError, ConfigError, ErrorKind, KeystoneError, KeystoneResult, MigrationError,
    StateError,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Physical position of a column inside its table.
pub type ColumnIndex = i64;

/// Separator between segments of a dotted field path (`owner.address.city`).
pub const FIELD_PATH_SEPARATOR: char = '.';

/// Default prefix that turns a class name into its table name.
pub const DEFAULT_TABLE_PREFIX: &str = "class_";

/// Stable identifier of a model class.
///
/// Assigned once when the class is registered and never reused for another
/// class during the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(u32);

impl ClassId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

impl From<u32> for ClassId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ============================================================================
// FIELD TYPES
// ============================================================================

/// Type of a model field as stored in a physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Boolean,
    String,
    Binary,
    Date,
    Float,
    Double,
    /// Single link to an object of another (or the same) class.
    Object,
    /// Ordered list of links.
    List,
    /// Derived reverse relationship, computed from a link declared elsewhere.
    Backlink,
    /// Returned for lookups that miss; never stored for a real column.
    Unsupported,
}

impl FieldType {
    /// Forward relationship stored in the declaring table.
    pub const fn is_link(self) -> bool {
        matches!(self, Self::Object | Self::List)
    }

    /// Forward link or backlink; a field path may continue through these.
    pub const fn is_relationship(self) -> bool {
        matches!(self, Self::Object | Self::List | Self::Backlink)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Object => "OBJECT",
            Self::List => "LIST",
            Self::Backlink => "BACKLINK",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// NAME RESOLUTION
// ============================================================================

/// Maps class identifiers to table names.
///
/// Only used to build diagnostics; nothing in the cache depends on the
/// returned names for correctness.
pub trait NameResolver {
    fn table_name(&self, class_id: ClassId) -> String;

    /// Prefix stripped from table names to recover class names.
    fn table_prefix(&self) -> &str {
        DEFAULT_TABLE_PREFIX
    }
}

/// Table name for a class, e.g. `Person` -> `class_Person`.
pub fn table_name_for_class(prefix: &str, class_name: &str) -> String {
    format!("{prefix}{class_name}")
}

/// Class name for a table; names without the prefix are returned unchanged.
pub fn class_name_for_table<'a>(prefix: &str, table_name: &'a str) -> &'a str {
    table_name.strip_prefix(prefix).unwrap_or(table_name)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_link_classification() {
        assert!(FieldType::Object.is_link());
        assert!(FieldType::List.is_link());
        assert!(!FieldType::Backlink.is_link());
        assert!(FieldType::Backlink.is_relationship());
        assert!(!FieldType::String.is_relationship());
        assert!(!FieldType::Unsupported.is_relationship());
    }

    #[test]
    fn test_field_type_serde() {
        let json = serde_json::to_string(&FieldType::List).unwrap();
        assert_eq!(json, "\"List\"");
        let back: FieldType = serde_json::from_str("\"Backlink\"").unwrap();
        assert_eq!(back, FieldType::Backlink);
    }

    #[test]
    fn test_table_name_round_trip() {
        let table = table_name_for_class(DEFAULT_TABLE_PREFIX, "Person");
        assert_eq!(table, "class_Person");
        assert_eq!(class_name_for_table(DEFAULT_TABLE_PREFIX, &table), "Person");
        assert_eq!(class_name_for_table(DEFAULT_TABLE_PREFIX, "metadata"), "metadata");
    }

    #[test]
    fn test_class_id_ordering_and_display() {
        let a = ClassId::new(1);
        let b = ClassId::from(2);
        assert!(a < b);
        assert_eq!(b.as_u32(), 2);
        assert_eq!(a.to_string(), "class#1");
    }
}
