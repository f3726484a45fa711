//! Error types for Keystone operations

use crate::FieldType;
use thiserror::Error;

/// The on-disk schema no longer matches the declared model.
///
/// Never retried; surfaced to whoever opened the connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Migration needed for {path}: class '{class_name}' has no table")]
    MissingClass { path: String, class_name: String },

    #[error("Migration needed for {path}: field '{field_name}' not found for type {class_name}")]
    MissingField {
        path: String,
        class_name: String,
        field_name: String,
    },

    #[error(
        "Migration needed for {path}: field '{field_name}' of {class_name}: expected type {expected} but found {found}"
    )]
    TypeMismatch {
        path: String,
        class_name: String,
        field_name: String,
        expected: FieldType,
        found: FieldType,
    },

    #[error("Migration needed for {path}: link field '{field_name}' of {class_name} has no target table")]
    MissingLinkTarget {
        path: String,
        class_name: String,
        field_name: String,
    },

    #[error(
        "Migration needed for {path}: backlink '{field_name}' of {class_name} reads from missing field '{source_field}' of {source_class}"
    )]
    MissingBacklinkSource {
        path: String,
        class_name: String,
        field_name: String,
        source_class: String,
        source_field: String,
    },
}

impl MigrationError {
    /// Name of the class whose table disagrees with the model.
    pub fn class_name(&self) -> &str {
        match self {
            Self::MissingClass { class_name, .. }
            | Self::MissingField { class_name, .. }
            | Self::TypeMismatch { class_name, .. }
            | Self::MissingLinkTarget { class_name, .. }
            | Self::MissingBacklinkSource { class_name, .. } => class_name,
        }
    }

    /// Offending field, if the mismatch is field-specific.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::MissingClass { .. } => None,
            Self::MissingField { field_name, .. }
            | Self::TypeMismatch { field_name, .. }
            | Self::MissingLinkTarget { field_name, .. }
            | Self::MissingBacklinkSource { field_name, .. } => Some(field_name),
        }
    }
}

/// Programming or integrity errors. They abort the calling operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Attempt to modify immutable cache")]
    ImmutableCache,

    #[error("An instance of ColumnIndices is already set")]
    AlreadyInitialized,

    #[error("Attempt to use column index before set")]
    NotInitialized,

    #[error("Failed to copy ColumnIndices cache: {class_name}")]
    ClassSetMismatch { class_name: String },

    #[error("Class '{class_name}' is still referenced by {referenced_by}")]
    ClassStillReferenced {
        class_name: String,
        referenced_by: String,
    },

    #[error("Class '{class_name}' does not exist")]
    ClassNotFound { class_name: String },

    #[error("Class '{class_name}' already exists")]
    ClassAlreadyExists { class_name: String },

    #[error("No class identifiers left")]
    ClassIdsExhausted,
}

/// Malformed input from the query or build caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Invalid query: field name is empty")]
    EmptyFieldPath,

    #[error("Invalid query: field name must not end with a period ('.'): {path}")]
    TrailingSeparator { path: String },

    #[error("Invalid query: field '{field_name}' does not exist in class {class_name}")]
    FieldNotFound {
        class_name: String,
        field_name: String,
    },

    #[error("Invalid query: field '{field_name}' in class {class_name} is of invalid type {found}")]
    NotALink {
        class_name: String,
        field_name: String,
        found: FieldType,
    },

    #[error("Invalid query: field '{field_name}' has unexpected type {found}, expected one of {expected:?}")]
    UnexpectedType {
        field_name: String,
        found: FieldType,
        expected: Vec<FieldType>,
    },

    #[error("Field '{field_name}' declared twice for {class_name}")]
    DuplicateField {
        class_name: String,
        field_name: String,
    },

    #[error("Class '{class_name}' is already registered")]
    DuplicateClass { class_name: String },

    #[error("Unknown class: {class_name}")]
    UnknownClass { class_name: String },

    #[error("Class name must not be empty")]
    EmptyClassName,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Coarse classification of a [`KeystoneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MigrationNeeded,
    InvalidState,
    InvalidArgument,
    Config,
}

/// Master error type for all Keystone errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeystoneError {
    #[error("{0}")]
    MigrationNeeded(#[from] MigrationError),

    #[error("Invalid state: {0}")]
    InvalidState(#[from] StateError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl KeystoneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MigrationNeeded(_) => ErrorKind::MigrationNeeded,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for Keystone operations.
pub type KeystoneResult<T> = Result<T, KeystoneError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display_missing_field() {
        let err = MigrationError::MissingField {
            path: "/data/default.db".to_string(),
            class_name: "Person".to_string(),
            field_name: "bestFriend".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/data/default.db"));
        assert!(msg.contains("bestFriend"));
        assert!(msg.contains("Person"));
        assert_eq!(err.class_name(), "Person");
        assert_eq!(err.field_name(), Some("bestFriend"));
    }

    #[test]
    fn test_migration_error_display_type_mismatch() {
        let err = MigrationError::TypeMismatch {
            path: "db".to_string(),
            class_name: "Dog".to_string(),
            field_name: "age".to_string(),
            expected: FieldType::Integer,
            found: FieldType::String,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected type INTEGER but found STRING"));
    }

    #[test]
    fn test_state_error_display_class_set_mismatch() {
        let err = StateError::ClassSetMismatch {
            class_name: "Dog".to_string(),
        };
        assert_eq!(format!("{}", err), "Failed to copy ColumnIndices cache: Dog");
    }

    #[test]
    fn test_argument_error_display_trailing_separator() {
        let err = ArgumentError::TrailingSeparator {
            path: "owner.".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("must not end with a period"));
        assert!(msg.contains("owner."));
    }

    #[test]
    fn test_keystone_error_from_variants() {
        let migration = KeystoneError::from(MigrationError::MissingClass {
            path: "db".to_string(),
            class_name: "Cat".to_string(),
        });
        assert_eq!(migration.kind(), ErrorKind::MigrationNeeded);

        let state = KeystoneError::from(StateError::ImmutableCache);
        assert_eq!(state.kind(), ErrorKind::InvalidState);

        let argument = KeystoneError::from(ArgumentError::EmptyFieldPath);
        assert_eq!(argument.kind(), ErrorKind::InvalidArgument);

        let config = KeystoneError::from(ConfigError::MissingRequired {
            field: "table_prefix".to_string(),
        });
        assert_eq!(config.kind(), ErrorKind::Config);
    }
}
