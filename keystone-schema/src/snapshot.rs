//! Read-only column indices for use off the connection's thread.

use crate::column_info::{fmt_column_info, ColumnMap};
use keystone_core::{ClassId, ColumnIndex, FieldType};
use std::collections::BTreeMap;
use std::fmt;

/// Frozen copy of a [`ColumnIndices`](crate::ColumnIndices) generation.
///
/// Holds owned descriptor maps and no interior mutability, so it is `Send`
/// and `Sync`. Later updates of the live cache are never observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndicesSnapshot {
    schema_version: i64,
    classes: BTreeMap<ClassId, ColumnMap>,
}

impl ColumnIndicesSnapshot {
    pub(crate) fn new(
        schema_version: i64,
        classes: impl IntoIterator<Item = (ClassId, ColumnMap)>,
    ) -> Self {
        Self {
            schema_version,
            classes: classes.into_iter().collect(),
        }
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub fn column_map(&self, class_id: ClassId) -> Option<&ColumnMap> {
        self.classes.get(&class_id)
    }

    pub fn column_index(&self, class_id: ClassId, field_name: &str) -> Option<ColumnIndex> {
        self.classes.get(&class_id)?.column_index(field_name)
    }

    /// `Unsupported` if the class or field is unknown.
    pub fn column_type(&self, class_id: ClassId, field_name: &str) -> FieldType {
        self.classes
            .get(&class_id)
            .map_or(FieldType::Unsupported, |map| map.column_type(field_name))
    }

    pub fn linked_table(&self, class_id: ClassId, field_name: &str) -> Option<String> {
        self.classes.get(&class_id)?.linked_table(field_name)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Display for ColumnIndicesSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnIndices[{},false", self.schema_version)?;
        for map in self.classes.values() {
            write!(f, ",{}->", map.class_name())?;
            fmt_column_info(f, false, map)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_info::ColumnDescriptor;
    use std::collections::HashMap;

    fn assert_send_sync<T: Send + Sync>() {}

    fn dog_map() -> ColumnMap {
        let mut columns = HashMap::new();
        columns.insert(
            "owner".to_string(),
            ColumnDescriptor::column(1, FieldType::Object, Some("Person".to_string())),
        );
        ColumnMap {
            class_name: "Dog".to_string(),
            columns,
        }
    }

    #[test]
    fn test_snapshot_is_send_and_sync() {
        assert_send_sync::<ColumnIndicesSnapshot>();
    }

    #[test]
    fn test_lookups() {
        let snapshot = ColumnIndicesSnapshot::new(4, [(ClassId::new(1), dog_map())]);
        let dog = ClassId::new(1);
        assert_eq!(snapshot.schema_version(), 4);
        assert_eq!(snapshot.column_index(dog, "owner"), Some(1));
        assert_eq!(snapshot.column_type(dog, "owner"), FieldType::Object);
        assert_eq!(snapshot.linked_table(dog, "owner").as_deref(), Some("Person"));
        assert_eq!(snapshot.column_index(dog, "name"), None);
        assert_eq!(snapshot.column_type(ClassId::new(7), "owner"), FieldType::Unsupported);
        assert_eq!(snapshot.linked_table(ClassId::new(7), "owner"), None);
    }

    #[test]
    fn test_display_matches_immutable_indices() {
        let snapshot = ColumnIndicesSnapshot::new(2, [(ClassId::new(1), dog_map())]);
        assert_eq!(
            snapshot.to_string(),
            "ColumnIndices[2,false,Dog->\
             ColumnInfo[false,Dog,owner->ColumnDetails[1, OBJECT, Person]]]"
        );
    }
}
