//! Keystone Storage - Table Traits and In-Memory Engine
//!
//! Defines the surface the column-index cache consumes from the physical
//! table engine, plus an in-memory implementation used by tests and by the
//! in-memory schema owner.

use keystone_core::{
    ArgumentError, ColumnIndex, FieldType, KeystoneResult, SchemaConfig, StateError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

// ============================================================================
// TABLE TRAITS
// ============================================================================

/// Shared handle to a physical table.
pub type TableHandle = Arc<dyn Table>;

/// A physical table as seen by the cache.
///
/// Lookups by name or position never fail; misses are reported as `None`
/// or [`FieldType::Unsupported`].
pub trait Table: Send + Sync + fmt::Debug {
    /// Physical table name, e.g. `class_Person`.
    fn name(&self) -> String;

    /// Model class stored in this table, e.g. `Person`.
    fn class_name(&self) -> String;

    fn column_count(&self) -> usize;

    /// Position of the named column.
    fn column_index(&self, column_name: &str) -> Option<ColumnIndex>;

    fn column_name(&self, column: ColumnIndex) -> Option<String>;

    /// Type of the column at `column`; `Unsupported` when out of range.
    fn column_type(&self, column: ColumnIndex) -> FieldType;

    /// Target table of an `Object`/`List` column.
    fn link_target(&self, column: ColumnIndex) -> Option<TableHandle>;
}

/// An open database connection.
pub trait Connection: Send + Sync {
    /// Location of the database; only used for diagnostics.
    fn path(&self) -> &str;

    /// Table by physical name.
    fn table(&self, table_name: &str) -> Option<TableHandle>;

    fn has_table(&self, table_name: &str) -> bool {
        self.table(table_name).is_some()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn position(column: ColumnIndex) -> Option<usize> {
    usize::try_from(column).ok()
}

// ============================================================================
// MEMORY TABLE
// ============================================================================

#[derive(Debug)]
struct MemoryColumn {
    name: String,
    field_type: FieldType,
    link_target: Option<Weak<MemoryTable>>,
}

#[derive(Debug)]
struct TableState {
    table_name: String,
    class_name: String,
    columns: Vec<MemoryColumn>,
}

/// In-memory table. Columns are positional; removing a column shifts the
/// positions of every column after it.
#[derive(Debug)]
pub struct MemoryTable {
    state: RwLock<TableState>,
}

impl MemoryTable {
    fn new(table_name: String, class_name: String) -> Self {
        Self {
            state: RwLock::new(TableState {
                table_name,
                class_name,
                columns: Vec::new(),
            }),
        }
    }

    /// Append a scalar column and return its position.
    pub fn add_column(&self, name: &str, field_type: FieldType) -> KeystoneResult<ColumnIndex> {
        if field_type.is_relationship() || field_type == FieldType::Unsupported {
            return Err(ArgumentError::UnexpectedType {
                field_name: name.to_string(),
                found: field_type,
                expected: vec![
                    FieldType::Integer,
                    FieldType::Boolean,
                    FieldType::String,
                    FieldType::Binary,
                    FieldType::Date,
                    FieldType::Float,
                    FieldType::Double,
                ],
            }
            .into());
        }
        self.push_column(name, field_type, None)
    }

    /// Append an `Object` or `List` column pointing at `target`.
    pub fn add_link_column(
        &self,
        name: &str,
        field_type: FieldType,
        target: &Arc<MemoryTable>,
    ) -> KeystoneResult<ColumnIndex> {
        if !field_type.is_link() {
            return Err(ArgumentError::UnexpectedType {
                field_name: name.to_string(),
                found: field_type,
                expected: vec![FieldType::Object, FieldType::List],
            }
            .into());
        }
        self.push_column(name, field_type, Some(Arc::downgrade(target)))
    }

    fn push_column(
        &self,
        name: &str,
        field_type: FieldType,
        link_target: Option<Weak<MemoryTable>>,
    ) -> KeystoneResult<ColumnIndex> {
        let mut state = write_lock(&self.state);
        if state.columns.iter().any(|c| c.name == name) {
            return Err(ArgumentError::DuplicateField {
                class_name: state.class_name.clone(),
                field_name: name.to_string(),
            }
            .into());
        }
        state.columns.push(MemoryColumn {
            name: name.to_string(),
            field_type,
            link_target,
        });
        Ok((state.columns.len() - 1) as ColumnIndex)
    }

    /// Remove a column; returns whether it existed.
    pub fn remove_column(&self, name: &str) -> bool {
        let mut state = write_lock(&self.state);
        let before = state.columns.len();
        state.columns.retain(|c| c.name != name);
        state.columns.len() != before
    }

    /// Names of this table's link columns that point at `target`.
    pub fn links_to(&self, target: &Arc<MemoryTable>) -> Vec<String> {
        read_lock(&self.state)
            .columns
            .iter()
            .filter(|c| {
                c.link_target
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .is_some_and(|t| Arc::ptr_eq(&t, target))
            })
            .map(|c| c.name.clone())
            .collect()
    }

    /// `(name, type, linked class)` for every column, in position order.
    pub fn columns(&self) -> Vec<(String, FieldType, Option<String>)> {
        read_lock(&self.state)
            .columns
            .iter()
            .map(|c| {
                let linked = c
                    .link_target
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .map(|t| t.class_name());
                (c.name.clone(), c.field_type, linked)
            })
            .collect()
    }

    fn rename(&self, table_name: String, class_name: String) {
        let mut state = write_lock(&self.state);
        state.table_name = table_name;
        state.class_name = class_name;
    }
}

impl Table for MemoryTable {
    fn name(&self) -> String {
        read_lock(&self.state).table_name.clone()
    }

    fn class_name(&self) -> String {
        read_lock(&self.state).class_name.clone()
    }

    fn column_count(&self) -> usize {
        read_lock(&self.state).columns.len()
    }

    fn column_index(&self, column_name: &str) -> Option<ColumnIndex> {
        read_lock(&self.state)
            .columns
            .iter()
            .position(|c| c.name == column_name)
            .map(|i| i as ColumnIndex)
    }

    fn column_name(&self, column: ColumnIndex) -> Option<String> {
        let state = read_lock(&self.state);
        position(column)
            .and_then(|i| state.columns.get(i))
            .map(|c| c.name.clone())
    }

    fn column_type(&self, column: ColumnIndex) -> FieldType {
        let state = read_lock(&self.state);
        position(column)
            .and_then(|i| state.columns.get(i))
            .map_or(FieldType::Unsupported, |c| c.field_type)
    }

    fn link_target(&self, column: ColumnIndex) -> Option<TableHandle> {
        let state = read_lock(&self.state);
        let target = position(column)
            .and_then(|i| state.columns.get(i))
            .and_then(|c| c.link_target.as_ref())
            .and_then(Weak::upgrade)?;
        Some(target as TableHandle)
    }
}

// ============================================================================
// MEMORY CONNECTION
// ============================================================================

/// In-memory connection holding tables keyed by physical name.
#[derive(Debug)]
pub struct MemoryConnection {
    path: String,
    table_prefix: String,
    tables: RwLock<BTreeMap<String, Arc<MemoryTable>>>,
}

impl MemoryConnection {
    /// Create an empty connection using the default table prefix.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_config(path, &SchemaConfig::default())
    }

    pub fn with_config(path: impl Into<String>, config: &SchemaConfig) -> Self {
        Self {
            path: path.into(),
            table_prefix: config.table_prefix.clone(),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    fn table_name(&self, class_name: &str) -> String {
        keystone_core::table_name_for_class(&self.table_prefix, class_name)
    }

    /// Create the table backing `class_name`.
    pub fn create_table(&self, class_name: &str) -> KeystoneResult<Arc<MemoryTable>> {
        if class_name.is_empty() {
            return Err(ArgumentError::EmptyClassName.into());
        }
        let table_name = self.table_name(class_name);
        let mut tables = write_lock(&self.tables);
        if tables.contains_key(&table_name) {
            return Err(StateError::ClassAlreadyExists {
                class_name: class_name.to_string(),
            }
            .into());
        }
        let table = Arc::new(MemoryTable::new(table_name.clone(), class_name.to_string()));
        tables.insert(table_name.clone(), Arc::clone(&table));
        tracing::debug!(table = %table_name, "Created table");
        Ok(table)
    }

    /// Table backing `class_name`.
    pub fn class_table(&self, class_name: &str) -> Option<Arc<MemoryTable>> {
        read_lock(&self.tables).get(&self.table_name(class_name)).cloned()
    }

    /// Other classes holding a link to `class_name`, with the linking field.
    /// Self-links are not reported.
    pub fn referencing_fields(&self, class_name: &str) -> Vec<(String, String)> {
        let Some(target) = self.class_table(class_name) else {
            return Vec::new();
        };
        read_lock(&self.tables)
            .values()
            .filter(|t| !Arc::ptr_eq(t, &target))
            .flat_map(|t| {
                let owner = t.class_name();
                t.links_to(&target)
                    .into_iter()
                    .map(move |field| (owner.clone(), field))
            })
            .collect()
    }

    /// Drop the table backing `class_name`. Fails while another class links to it.
    pub fn remove_table(&self, class_name: &str) -> KeystoneResult<()> {
        if self.class_table(class_name).is_none() {
            return Err(StateError::ClassNotFound {
                class_name: class_name.to_string(),
            }
            .into());
        }
        if let Some((owner, field)) = self.referencing_fields(class_name).into_iter().next() {
            return Err(StateError::ClassStillReferenced {
                class_name: class_name.to_string(),
                referenced_by: format!("{owner}.{field}"),
            }
            .into());
        }
        let table_name = self.table_name(class_name);
        write_lock(&self.tables).remove(&table_name);
        tracing::debug!(table = %table_name, "Removed table");
        Ok(())
    }

    /// Rename the class (and table) `old` to `new`. Links keep pointing at
    /// the same table.
    pub fn rename_table(&self, old: &str, new: &str) -> KeystoneResult<Arc<MemoryTable>> {
        if new.is_empty() {
            return Err(ArgumentError::EmptyClassName.into());
        }
        let old_name = self.table_name(old);
        let new_name = self.table_name(new);
        let mut tables = write_lock(&self.tables);
        if tables.contains_key(&new_name) {
            return Err(StateError::ClassAlreadyExists {
                class_name: new.to_string(),
            }
            .into());
        }
        let table = tables.remove(&old_name).ok_or_else(|| StateError::ClassNotFound {
            class_name: old.to_string(),
        })?;
        table.rename(new_name.clone(), new.to_string());
        tables.insert(new_name.clone(), Arc::clone(&table));
        tracing::debug!(from = %old_name, to = %new_name, "Renamed table");
        Ok(table)
    }

    /// Class names of all tables, sorted by table name.
    pub fn class_names(&self) -> Vec<String> {
        read_lock(&self.tables)
            .values()
            .map(|t| t.class_name())
            .collect()
    }

    pub fn table_count(&self) -> usize {
        read_lock(&self.tables).len()
    }
}

impl Connection for MemoryConnection {
    fn path(&self) -> &str {
        &self.path
    }

    fn table(&self, table_name: &str) -> Option<TableHandle> {
        let table = read_lock(&self.tables).get(table_name).cloned()?;
        Some(table as TableHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{ErrorKind, KeystoneError};

    fn person_connection() -> (MemoryConnection, Arc<MemoryTable>) {
        let conn = MemoryConnection::new("/tmp/people.db");
        let person = conn.create_table("Person").unwrap();
        person.add_column("name", FieldType::String).unwrap();
        person
            .add_link_column("bestFriend", FieldType::Object, &person)
            .unwrap();
        (conn, person)
    }

    #[test]
    fn test_column_lookup() {
        let (conn, _) = person_connection();
        let table = conn.table("class_Person").expect("table exists");
        assert_eq!(table.name(), "class_Person");
        assert_eq!(table.class_name(), "Person");
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.column_index("name"), Some(0));
        assert_eq!(table.column_index("bestFriend"), Some(1));
        assert_eq!(table.column_index("missing"), None);
        assert_eq!(table.column_type(0), FieldType::String);
        assert_eq!(table.column_type(7), FieldType::Unsupported);
        assert_eq!(table.column_type(-1), FieldType::Unsupported);
        assert_eq!(table.column_name(1).as_deref(), Some("bestFriend"));
    }

    #[test]
    fn test_link_target_resolves_class() {
        let (conn, _) = person_connection();
        let table = conn.table("class_Person").unwrap();
        let target = table.link_target(1).expect("link column has a target");
        assert_eq!(target.class_name(), "Person");
        assert!(table.link_target(0).is_none());
    }

    #[test]
    fn test_add_column_rejects_link_types() {
        let (_, person) = person_connection();
        let err = person.add_column("dogs", FieldType::List).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = person
            .add_link_column("age", FieldType::Integer, &person)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = person.add_column("name", FieldType::String).unwrap_err();
        assert!(matches!(
            err,
            KeystoneError::InvalidArgument(ArgumentError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_remove_column_shifts_positions() {
        let (conn, person) = person_connection();
        person.add_column("age", FieldType::Integer).unwrap();
        assert!(person.remove_column("name"));
        assert!(!person.remove_column("name"));

        let table = conn.table("class_Person").unwrap();
        assert_eq!(table.column_index("bestFriend"), Some(0));
        assert_eq!(table.column_index("age"), Some(1));
    }

    #[test]
    fn test_remove_table_blocked_by_foreign_link() {
        let (conn, person) = person_connection();
        let dog = conn.create_table("Dog").unwrap();
        person.add_link_column("dogs", FieldType::List, &dog).unwrap();

        let err = conn.remove_table("Dog").unwrap_err();
        assert!(matches!(
            err,
            KeystoneError::InvalidState(StateError::ClassStillReferenced { ref referenced_by, .. })
                if referenced_by == "Person.dogs"
        ));

        // Self-links never block removal.
        assert!(person.remove_column("dogs"));
        conn.remove_table("Dog").unwrap();
        conn.remove_table("Person").unwrap();
        assert_eq!(conn.table_count(), 0);
    }

    #[test]
    fn test_rename_table_keeps_links() {
        let (conn, person) = person_connection();
        let dog = conn.create_table("Dog").unwrap();
        dog.add_link_column("owner", FieldType::Object, &person).unwrap();

        conn.rename_table("Person", "Human").unwrap();
        assert!(conn.table("class_Person").is_none());

        let dog_table = conn.table("class_Dog").unwrap();
        let owner = dog_table.link_target(0).unwrap();
        assert_eq!(owner.class_name(), "Human");
        assert_eq!(owner.name(), "class_Human");
        assert_eq!(conn.class_names(), vec!["Dog".to_string(), "Human".to_string()]);
    }

    #[test]
    fn test_create_and_rename_conflicts() {
        let (conn, _) = person_connection();
        conn.create_table("Dog").unwrap();
        assert!(matches!(
            conn.create_table("Dog").unwrap_err(),
            KeystoneError::InvalidState(StateError::ClassAlreadyExists { .. })
        ));
        assert!(matches!(
            conn.rename_table("Dog", "Person").unwrap_err(),
            KeystoneError::InvalidState(StateError::ClassAlreadyExists { .. })
        ));
        assert!(matches!(
            conn.rename_table("Cat", "Lion").unwrap_err(),
            KeystoneError::InvalidState(StateError::ClassNotFound { .. })
        ));
        assert!(matches!(
            conn.create_table("").unwrap_err(),
            KeystoneError::InvalidArgument(ArgumentError::EmptyClassName)
        ));
    }

    #[test]
    fn test_custom_prefix() {
        let config = SchemaConfig {
            table_prefix: "tbl_".to_string(),
            ..SchemaConfig::default()
        };
        let conn = MemoryConnection::with_config("mem", &config);
        conn.create_table("Cat").unwrap();
        assert!(conn.has_table("tbl_Cat"));
        assert!(!conn.has_table("class_Cat"));
        assert_eq!(conn.path(), "mem");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_remove_column_shifts_later_columns(
                names in prop::collection::btree_set("[a-z]{1,8}", 2..10),
                pick in any::<prop::sample::Index>(),
            ) {
                let conn = MemoryConnection::new("mem");
                let table = conn.create_table("Item").unwrap();
                let names: Vec<String> = names.into_iter().collect();
                for name in &names {
                    table.add_column(name, FieldType::Integer).unwrap();
                }

                let removed = pick.index(names.len());
                prop_assert!(table.remove_column(&names[removed]));
                prop_assert_eq!(table.column_count(), names.len() - 1);
                for (position, name) in names.iter().enumerate() {
                    let expected = match position {
                        p if p < removed => Some(p as ColumnIndex),
                        p if p == removed => None,
                        p => Some(p as ColumnIndex - 1),
                    };
                    prop_assert_eq!(table.column_index(name), expected);
                }
            }
        }
    }
}
