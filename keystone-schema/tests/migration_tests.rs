//! Migration and refresh scenarios over the Person/Dog fixture schema.

use keystone_core::FieldType;
use keystone_schema::{ClassRegistry, ClassSpec, MemorySchema, SchemaConfig, SchemaOwner};
use keystone_storage::MemoryConnection;
use keystone_test_utils::assertions::*;
use keystone_test_utils::fixtures::*;
use keystone_test_utils::init_tracing;
use std::rc::Rc;
use std::sync::Arc;

// ============================================================================
// OPEN
// ============================================================================

#[test]
fn missing_link_column_needs_migration() {
    init_tracing();
    let connection = Arc::new(MemoryConnection::new(TEST_PATH));
    let person = connection.create_table("Person").unwrap();
    person.add_column("name", FieldType::String).unwrap();

    let mut registry = ClassRegistry::new(SchemaConfig::default());
    registry.register(person_spec()).unwrap();

    let result = MemorySchema::open(connection, registry, 1);
    assert_migration_needed(&result, "Person", Some("bestFriend"));
    let message = result.unwrap_err().to_string();
    assert!(message.contains("bestFriend"));
    assert!(message.contains("Person"));
    assert!(message.contains(TEST_PATH));
}

#[test]
fn missing_table_needs_migration() {
    init_tracing();
    let connection = Arc::new(MemoryConnection::new(TEST_PATH));
    add_person_table(&connection);

    let result = MemorySchema::open(connection, person_dog_registry(), 1);
    assert_migration_needed(&result, "Dog", None);
}

#[test]
fn column_type_change_needs_migration() {
    init_tracing();
    let connection = Arc::new(MemoryConnection::new(TEST_PATH));
    add_person_table(&connection);
    let dog = connection.create_table("Dog").unwrap();
    dog.add_column("name", FieldType::Integer).unwrap();

    let mut registry = ClassRegistry::new(SchemaConfig::default());
    registry.register(person_spec()).unwrap();
    registry.register(ClassSpec::new("Dog").field("name", FieldType::String)).unwrap();

    let result = MemorySchema::open(Arc::clone(&connection), registry.clone(), 1);
    assert_migration_needed(&result, "Dog", Some("name"));

    let lenient = SchemaConfig {
        verify_column_types: false,
        ..SchemaConfig::default()
    };
    let mut lenient_registry = ClassRegistry::new(lenient);
    lenient_registry.register(person_spec()).unwrap();
    lenient_registry
        .register(ClassSpec::new("Dog").field("name", FieldType::String))
        .unwrap();
    assert!(MemorySchema::open(connection, lenient_registry, 1).is_ok());
}

#[test]
fn indices_match_physical_table() {
    init_tracing();
    let schema = open_person_dog();
    let person = person_id(&schema);
    let dog = dog_id(&schema);
    let person_table = schema.table("Person").unwrap();
    let dog_table = schema.table("Dog").unwrap();

    for _ in 0..3 {
        assert_eq!(
            schema.column_index(person, "name").unwrap(),
            person_table.column_index("name")
        );
        assert_eq!(
            schema.column_index(person, "bestFriend").unwrap(),
            person_table.column_index("bestFriend")
        );
        assert_eq!(
            schema.column_index(dog, "owner").unwrap(),
            dog_table.column_index("owner")
        );
    }
}

#[test]
fn backlink_reports_source_class() {
    init_tracing();
    let schema = open_person_dog();
    let info = schema.column_info(person_id(&schema)).unwrap().unwrap();

    assert_eq!(info.column_type("friendsOf"), FieldType::Backlink);
    assert_eq!(info.linked_table("friendsOf").as_deref(), Some("Person"));
    assert_eq!(info.column_index("friendsOf"), info.column_index("bestFriend"));
}

#[test]
fn unknown_names_are_not_errors() {
    init_tracing();
    let schema = open_person_dog();
    let person = person_id(&schema);
    let info = schema.column_info(person).unwrap().unwrap();

    assert_eq!(info.column_index("age"), None);
    assert_eq!(info.column_type("age"), FieldType::Unsupported);
    assert_eq!(info.linked_table("age"), None);
    assert_eq!(schema.column_index(person, "age").unwrap(), None);
    assert!(schema
        .column_info(keystone_core::ClassId::new(99))
        .unwrap()
        .is_none());
}

// ============================================================================
// GENERATION UPDATES
// ============================================================================

#[test]
fn added_field_is_seen_through_old_references() {
    init_tracing();
    let mut schema = open_person_dog();
    let person = person_id(&schema);
    let handle = schema.column_info(person).unwrap().unwrap();
    let snapshot = schema.immutable_snapshot().unwrap();
    assert_eq!(handle.column_index("age"), None);

    let person_table = schema.connection().class_table("Person").unwrap();
    let age = person_table.add_column("age", FieldType::Integer).unwrap();

    let mut next_registry = ClassRegistry::new(SchemaConfig::default());
    next_registry
        .register(person_spec().field("age", FieldType::Integer))
        .unwrap();
    next_registry.register(dog_spec()).unwrap();
    let next = next_registry
        .build_indices(schema.connection().as_ref(), 2)
        .unwrap();

    schema.update_column_indices(&next, &next_registry).unwrap();

    assert_eq!(handle.column_index("age"), Some(age));
    assert_eq!(schema.schema_version().unwrap(), 2);
    assert!(Rc::ptr_eq(&handle, &schema.column_info(person).unwrap().unwrap()));

    // The snapshot taken before the update still sees generation 1.
    assert_eq!(snapshot.schema_version(), 1);
    assert_eq!(snapshot.column_index(person, "age"), None);
}

fn open_with_cat() -> MemorySchema {
    let connection = person_dog_connection();
    let cat = connection.create_table("Cat").unwrap();
    cat.add_column("lives", FieldType::Integer).unwrap();
    let mut registry = person_dog_registry();
    registry
        .register(ClassSpec::new("Cat").field("lives", FieldType::Integer))
        .unwrap();
    MemorySchema::open(connection, registry, 1).unwrap()
}

#[test]
fn created_class_is_cached_after_refresh() {
    init_tracing();
    let mut schema = open_person_dog();
    schema
        .create(
            ClassSpec::new("Cat")
                .field("lives", FieldType::Integer)
                .link("owner", FieldType::Object, "Person"),
        )
        .unwrap();
    let cat = schema.registry().class_id("Cat").unwrap();
    assert!(schema.column_info(cat).unwrap().is_none());

    schema.refresh(2).unwrap();
    assert!(!schema.needs_refresh());
    assert_eq!(schema.column_index(cat, "lives").unwrap(), Some(0));
    assert_eq!(schema.column_index(cat, "owner").unwrap(), Some(1));
    assert_eq!(
        schema.immutable_snapshot().unwrap().column_index(cat, "lives"),
        Some(0)
    );
}

#[test]
fn removed_class_leaves_cache_on_refresh() {
    init_tracing();
    let mut schema = open_with_cat();
    let cat = schema.registry().class_id("Cat").unwrap();
    let dog = dog_id(&schema);
    let dog_handle = schema.column_info(dog).unwrap().unwrap();

    schema.remove("Cat").unwrap();
    assert!(schema.needs_refresh());
    assert!(!schema.contains("Cat"));

    schema.refresh(2).unwrap();
    assert!(!schema.needs_refresh());
    assert_eq!(schema.schema_version().unwrap(), 2);
    assert!(schema.column_info(cat).unwrap().is_none());
    assert!(Rc::ptr_eq(&dog_handle, &schema.column_info(dog).unwrap().unwrap()));

    // Later refreshes keep working.
    schema.refresh(3).unwrap();
    assert_eq!(schema.schema_version().unwrap(), 3);
}

#[test]
fn strict_copy_from_names_removed_class() {
    init_tracing();
    let mut schema = open_with_cat();
    let mut previous = schema
        .registry()
        .build_indices(schema.connection().as_ref(), 1)
        .unwrap();

    schema.remove("Cat").unwrap();
    let next = schema
        .registry()
        .build_indices(schema.connection().as_ref(), 2)
        .unwrap();

    let result = previous.copy_from(&next, schema.registry());
    assert_class_set_mismatch(&result, "Cat");
    // Person and Dog precede Cat and were already copied; the version stays.
    assert_eq!(previous.schema_version(), 1);
}

#[test]
fn renamed_class_refreshes_in_place() {
    init_tracing();
    let mut schema = open_person_dog();
    let dog = dog_id(&schema);
    let handle = schema.column_info(dog).unwrap().unwrap();

    schema.rename("Dog", "Hound").unwrap();
    schema.refresh(2).unwrap();

    assert_eq!(handle.class_name(), "Hound");
    assert_eq!(schema.schema_version().unwrap(), 2);
    assert_eq!(schema.registry().class_id("Hound"), Some(dog));
}

#[test]
fn immutable_snapshot_rejects_updates() {
    init_tracing();
    let schema = open_person_dog();
    let mut snapshot = schema.cache().column_indices().unwrap().snapshot(false);
    let before = snapshot.to_string();
    assert_eq!(before, schema.immutable_snapshot().unwrap().to_string());

    let next = schema
        .registry()
        .build_indices(schema.connection().as_ref(), 2)
        .unwrap();
    let result = snapshot.copy_from(&next, schema.registry());
    assert_invalid_state(&result);
    assert_eq!(snapshot.to_string(), before);
}

#[test]
fn double_initialisation_is_rejected() {
    init_tracing();
    let mut schema = open_person_dog();
    let indices = schema.cache().column_indices().unwrap().snapshot(false);
    assert_invalid_state(&schema.set_initial_column_indices(&indices));
    assert_invalid_state(&schema.set_initial_column_info(1, Vec::new()));
}

#[test]
fn snapshot_can_cross_threads() {
    init_tracing();
    let schema = open_person_dog();
    let person = person_id(&schema);
    let snapshot = schema.immutable_snapshot().unwrap();

    let index = std::thread::spawn(move || snapshot.column_index(person, "bestFriend"))
        .join()
        .unwrap();
    assert_eq!(index, Some(1));
}
