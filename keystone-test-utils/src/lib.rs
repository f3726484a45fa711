//! Keystone Test Utilities
//!
//! Shared test infrastructure for the Keystone workspace:
//! - Tracing setup for test binaries
//! - Proptest generators for field types, names and paths
//! - Fixtures for the Person/Dog schema over an in-memory connection
//! - Assertions for Keystone error kinds

pub use keystone_core::{
    ArgumentError, ClassId, ColumnIndex, ErrorKind, FieldType, KeystoneError, KeystoneResult,
    MigrationError, NameResolver, SchemaConfig, StateError,
};
pub use keystone_schema::{
    ClassRegistry, ClassSpec, ColumnIndices, ColumnIndicesSnapshot, ColumnInfo, MemorySchema,
    SchemaOwner,
};
pub use keystone_storage::{Connection, MemoryConnection, MemoryTable, Table};

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_env("KEYSTONE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // Another harness may already own the global subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install a test-friendly subscriber once per process.
///
/// Filter directives come from `KEYSTONE_LOG`, then `RUST_LOG`.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Keystone schema types.

    use super::*;
    use proptest::prelude::*;

    /// Any type a stored column can have.
    pub fn arb_column_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::Integer),
            Just(FieldType::Boolean),
            Just(FieldType::String),
            Just(FieldType::Binary),
            Just(FieldType::Date),
            Just(FieldType::Float),
            Just(FieldType::Double),
            Just(FieldType::Object),
            Just(FieldType::List),
        ]
    }

    /// Column types that need no link target.
    pub fn arb_scalar_type() -> impl Strategy<Value = FieldType> {
        arb_column_type().prop_filter("scalar", |t| !t.is_link())
    }

    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9_]{0,11}"
    }

    /// Dotted paths of one to five valid segments.
    pub fn arb_field_path() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_field_name(), 1..=5).prop_map(|segments| segments.join("."))
    }

    /// Distinct scalar fields, in column order.
    pub fn arb_scalar_fields(max: usize) -> impl Strategy<Value = Vec<(String, FieldType)>> {
        prop::collection::btree_map(arb_field_name(), arb_scalar_type(), 1..=max)
            .prop_map(|fields| fields.into_iter().collect())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Person/Dog schema used across the integration tests.
    //!
    //! `Person { name: String, bestFriend: Object<Person> }` with the backlink
    //! `friendsOf` reading `Person.bestFriend`, and
    //! `Dog { name: String, owner: Object<Person> }`.

    use super::*;
    use std::sync::Arc;

    pub const TEST_PATH: &str = "/tmp/keystone-test.db";

    pub fn person_spec() -> ClassSpec {
        ClassSpec::new("Person")
            .field("name", FieldType::String)
            .link("bestFriend", FieldType::Object, "Person")
            .backlink("friendsOf", "Person", "bestFriend")
    }

    pub fn dog_spec() -> ClassSpec {
        ClassSpec::new("Dog")
            .field("name", FieldType::String)
            .link("owner", FieldType::Object, "Person")
    }

    /// Connection holding the physical Person and Dog tables.
    pub fn person_dog_connection() -> Arc<MemoryConnection> {
        let connection = Arc::new(MemoryConnection::new(TEST_PATH));
        let person = add_person_table(&connection);
        add_dog_table(&connection, &person);
        connection
    }

    pub fn add_person_table(connection: &MemoryConnection) -> Arc<MemoryTable> {
        let person = connection
            .create_table("Person")
            .expect("Person table should be new");
        person
            .add_column("name", FieldType::String)
            .expect("name column");
        person
            .add_link_column("bestFriend", FieldType::Object, &person)
            .expect("bestFriend column");
        person
    }

    pub fn add_dog_table(
        connection: &MemoryConnection,
        person: &Arc<MemoryTable>,
    ) -> Arc<MemoryTable> {
        let dog = connection
            .create_table("Dog")
            .expect("Dog table should be new");
        dog.add_column("name", FieldType::String).expect("name column");
        dog.add_link_column("owner", FieldType::Object, person)
            .expect("owner column");
        dog
    }

    /// Registry declaring Person (id 0) and Dog (id 1).
    pub fn person_dog_registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new(SchemaConfig::default());
        registry.register(person_spec()).expect("register Person");
        registry.register(dog_spec()).expect("register Dog");
        registry
    }

    /// Open schema at version 1 over [`person_dog_connection`].
    pub fn open_person_dog() -> MemorySchema {
        MemorySchema::open(person_dog_connection(), person_dog_registry(), 1)
            .expect("fixture schema should open")
    }

    pub fn person_id(schema: &MemorySchema) -> ClassId {
        schema
            .registry()
            .class_id("Person")
            .expect("Person is registered")
    }

    pub fn dog_id(schema: &MemorySchema) -> ClassId {
        schema.registry().class_id("Dog").expect("Dog is registered")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Keystone error kinds.

    use super::*;

    /// Assert that `result` is a MigrationNeeded error naming `class_name`
    /// and, if given, `field_name`.
    #[track_caller]
    pub fn assert_migration_needed<T: std::fmt::Debug>(
        result: &KeystoneResult<T>,
        class_name: &str,
        field_name: Option<&str>,
    ) {
        match result {
            Err(KeystoneError::MigrationNeeded(err)) => {
                assert_eq!(err.class_name(), class_name, "Wrong class in {err:?}");
                if let Some(field) = field_name {
                    assert_eq!(err.field_name(), Some(field), "Wrong field in {err:?}");
                }
                let message = err.to_string();
                assert!(message.contains(class_name), "Message lacks class: {message}");
            }
            other => panic!("Expected MigrationNeeded for {class_name}, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_invalid_state<T: std::fmt::Debug>(result: &KeystoneResult<T>) {
        match result {
            Err(err) if err.kind() == ErrorKind::InvalidState => {}
            other => panic!("Expected InvalidState, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_invalid_argument<T: std::fmt::Debug>(result: &KeystoneResult<T>) {
        match result {
            Err(err) if err.kind() == ErrorKind::InvalidArgument => {}
            other => panic!("Expected InvalidArgument, got: {other:?}"),
        }
    }

    /// Assert that `result` reports `class_name` missing from a new generation.
    #[track_caller]
    pub fn assert_class_set_mismatch<T: std::fmt::Debug>(
        result: &KeystoneResult<T>,
        class_name: &str,
    ) {
        match result {
            Err(KeystoneError::InvalidState(StateError::ClassSetMismatch { class_name: c })) => {
                assert_eq!(c, class_name, "Wrong class in ClassSetMismatch");
            }
            other => panic!("Expected ClassSetMismatch for {class_name}, got: {other:?}"),
        }
    }
}
