//! Per-class field-name to column mapping.
//!
//! A [`ColumnInfo`] is built once per class per schema generation by a
//! [`ColumnInfoBuilder`](crate::ColumnInfoBuilder). Its descriptor map is
//! never edited in place: [`ColumnInfo::copy_from`] swaps the whole map, so
//! a reader observes either the previous generation or the new one.
//!
//! `ColumnInfo` values are shared as `Rc<ColumnInfo>` on the thread that owns
//! the connection. The identity of a shared instance survives `copy_from`,
//! which is how every outstanding reference observes a migration. Neither
//! type is `Send`; data for other threads goes through
//! [`ColumnIndicesSnapshot`](crate::ColumnIndicesSnapshot).
//!
//! ```compile_fail
//! fn require_send<T: Send>() {}
//! require_send::<keystone_schema::ColumnInfo>();
//! ```

use keystone_core::{ColumnIndex, FieldType, KeystoneResult, StateError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Class and field a backlink reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacklinkSource {
    pub class_name: String,
    pub field_name: String,
}

/// Physical location and type of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    index: ColumnIndex,
    field_type: FieldType,
    linked_class: Option<String>,
    backlink: Option<BacklinkSource>,
}

impl ColumnDescriptor {
    /// Descriptor of a forward column. `linked_class` is set for links only.
    pub fn column(index: ColumnIndex, field_type: FieldType, linked_class: Option<String>) -> Self {
        Self {
            index,
            field_type,
            linked_class,
            backlink: None,
        }
    }

    /// Descriptor of a backlink. `index` is the source column's position in
    /// the source class's table.
    pub fn backlink(index: ColumnIndex, source_class: &str, source_field: &str) -> Self {
        Self {
            index,
            field_type: FieldType::Backlink,
            linked_class: Some(source_class.to_string()),
            backlink: Some(BacklinkSource {
                class_name: source_class.to_string(),
                field_name: source_field.to_string(),
            }),
        }
    }

    pub fn index(&self) -> ColumnIndex {
        self.index
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Class on the other side of a link or backlink.
    pub fn linked_class(&self) -> Option<&str> {
        self.linked_class.as_deref()
    }

    pub fn backlink_source(&self) -> Option<&BacklinkSource> {
        self.backlink.as_ref()
    }

    pub fn is_backlink(&self) -> bool {
        self.backlink.is_some()
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ColumnDetails[{}, {}, {}]",
            self.index,
            self.field_type,
            self.linked_class.as_deref().unwrap_or("null")
        )
    }
}

/// Descriptor map of one class at one schema generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMap {
    pub(crate) class_name: String,
    pub(crate) columns: HashMap<String, ColumnDescriptor>,
}

impl ColumnMap {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn get(&self, field_name: &str) -> Option<&ColumnDescriptor> {
        self.columns.get(field_name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnDescriptor)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries sorted by field name.
    pub fn sorted(&self) -> Vec<(&str, &ColumnDescriptor)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn column_index(&self, field_name: &str) -> Option<ColumnIndex> {
        self.get(field_name).map(ColumnDescriptor::index)
    }

    pub fn column_type(&self, field_name: &str) -> FieldType {
        self.get(field_name)
            .map_or(FieldType::Unsupported, ColumnDescriptor::field_type)
    }

    pub fn linked_table(&self, field_name: &str) -> Option<String> {
        self.get(field_name)
            .and_then(|d| d.linked_class().map(str::to_string))
    }
}

/// Field-name to column mapping for one model class.
#[derive(Debug)]
pub struct ColumnInfo {
    map: RefCell<Rc<ColumnMap>>,
    mutable: bool,
}

impl ColumnInfo {
    pub(crate) fn from_map(map: ColumnMap, mutable: bool) -> Self {
        Self {
            map: RefCell::new(Rc::new(map)),
            mutable,
        }
    }

    /// Current descriptor map. The returned map is never modified; later
    /// `copy_from` calls replace it rather than edit it.
    pub fn descriptors(&self) -> Rc<ColumnMap> {
        Rc::clone(&self.map.borrow())
    }

    /// Owned copy of the current descriptor map.
    pub fn to_map(&self) -> ColumnMap {
        ColumnMap::clone(&self.map.borrow())
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn class_name(&self) -> String {
        self.descriptors().class_name.clone()
    }

    pub fn field_count(&self) -> usize {
        self.descriptors().len()
    }

    pub fn descriptor(&self, field_name: &str) -> Option<ColumnDescriptor> {
        self.descriptors().get(field_name).cloned()
    }

    /// Column position of the named field, `None` if unknown.
    pub fn column_index(&self, field_name: &str) -> Option<ColumnIndex> {
        self.map.borrow().column_index(field_name)
    }

    /// Column type of the named field, `Unsupported` if unknown.
    pub fn column_type(&self, field_name: &str) -> FieldType {
        self.map.borrow().column_type(field_name)
    }

    /// Class linked by the named field; `None` for scalar or unknown fields.
    pub fn linked_table(&self, field_name: &str) -> Option<String> {
        self.map.borrow().linked_table(field_name)
    }

    /// Make this instance an exact copy of `src`.
    ///
    /// The descriptor map and the class name are replaced in a single swap.
    /// Fails without touching `self` if this instance is immutable.
    pub fn copy_from(&self, src: &ColumnInfo) -> KeystoneResult<()> {
        if !self.mutable {
            return Err(StateError::ImmutableCache.into());
        }
        if std::ptr::eq(self, src) {
            return Ok(());
        }
        // Descriptors are immutable, so the source map can be shared.
        let next = src.descriptors();
        *self.map.borrow_mut() = next;
        Ok(())
    }

    /// Independent structural copy with the requested mutability.
    pub fn copy(&self, mutable: bool) -> ColumnInfo {
        Self::from_map(self.to_map(), mutable)
    }
}

/// Shared by [`ColumnInfo`] and frozen snapshots so both render alike.
pub(crate) fn fmt_column_info(
    f: &mut fmt::Formatter<'_>,
    mutable: bool,
    map: &ColumnMap,
) -> fmt::Result {
    write!(f, "ColumnInfo[{},{}", mutable, map.class_name)?;
    for (name, descriptor) in map.sorted() {
        write!(f, ",{name}->{descriptor}")?;
    }
    f.write_str("]")
}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_column_info(f, self.mutable, &self.map.borrow())
    }
}
