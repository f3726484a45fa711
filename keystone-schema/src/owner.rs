//! Per-connection schema owner.
//!
//! [`SchemaCache`] is the engine-independent half: it holds the single
//! mutable [`ColumnIndices`] of a connection and enforces that it is set
//! exactly once. [`SchemaOwner`] is the engine-specific half: dynamic schema
//! changes and field-path resolution, plus provided methods that forward to
//! the cache.

use crate::column_indices::ColumnIndices;
use crate::column_info::ColumnInfo;
use crate::registry::ClassSpec;
use crate::snapshot::ColumnIndicesSnapshot;
use keystone_core::{
    ArgumentError, ClassId, ColumnIndex, FieldType, KeystoneResult, NameResolver, StateError,
    FIELD_PATH_SEPARATOR,
};
use keystone_storage::{Table, TableHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

// ============================================================================
// FIELD PATHS
// ============================================================================

/// Split a dotted field path (`owner.address.city`) into its segments.
///
/// Interior empty segments are kept; they fail later as unknown fields.
pub fn parse_field_path(field_path: &str) -> KeystoneResult<Vec<String>> {
    if field_path.is_empty() {
        return Err(ArgumentError::EmptyFieldPath.into());
    }
    if field_path.ends_with(FIELD_PATH_SEPARATOR) {
        return Err(ArgumentError::TrailingSeparator {
            path: field_path.to_string(),
        }
        .into());
    }
    Ok(field_path
        .split(FIELD_PATH_SEPARATOR)
        .map(str::to_string)
        .collect())
}

/// Result of walking a field path from a starting table.
///
/// `column_indices` and `tables` always have one entry per segment. `tables`
/// holds the target table for segments that cross a link or backlink and
/// `None` for the others.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub column_indices: Vec<ColumnIndex>,
    pub tables: Vec<Option<TableHandle>>,
    pub final_type: FieldType,
}

impl ResolvedPath {
    pub fn len(&self) -> usize {
        self.column_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column_indices.is_empty()
    }

    /// Column of the last segment.
    pub fn last_index(&self) -> Option<ColumnIndex> {
        self.column_indices.last().copied()
    }
}

// ============================================================================
// CLASS SUMMARIES
// ============================================================================

/// One field as reported by the dynamic schema API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_class: Option<String>,
}

/// Read-only description of a class as it currently exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchema {
    pub class_name: String,
    pub fields: Vec<FieldSchema>,
}

impl ClassSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

impl fmt::Display for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.class_name)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.field_type)?;
            if let Some(linked) = &field.linked_class {
                write!(f, "<{linked}>")?;
            }
        }
        f.write_str("}")
    }
}

// ============================================================================
// SCHEMA CACHE
// ============================================================================

/// Single-initialisation holder of a connection's [`ColumnIndices`].
#[derive(Debug, Default)]
pub struct SchemaCache {
    indices: Option<ColumnIndices>,
    closed: bool,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.indices.is_some()
    }

    fn install(&mut self, indices: ColumnIndices) -> KeystoneResult<()> {
        if self.indices.is_some() || self.closed {
            return Err(StateError::AlreadyInitialized.into());
        }
        tracing::info!(
            schema_version = indices.schema_version(),
            classes = indices.len(),
            "Column indices initialised"
        );
        self.indices = Some(indices);
        Ok(())
    }

    /// Install a mutable copy of `indices`. The caller keeps its own instance.
    pub fn set_initial_column_indices(&mut self, indices: &ColumnIndices) -> KeystoneResult<()> {
        self.install(indices.snapshot(true))
    }

    /// Build and install the indices from freshly built column infos.
    pub fn set_initial_column_info(
        &mut self,
        schema_version: i64,
        classes: impl IntoIterator<Item = (ClassId, ColumnInfo)>,
    ) -> KeystoneResult<()> {
        self.install(ColumnIndices::new(schema_version, classes))
    }

    /// The installed indices.
    pub fn column_indices(&self) -> KeystoneResult<&ColumnIndices> {
        self.indices
            .as_ref()
            .ok_or_else(|| StateError::NotInitialized.into())
    }

    /// Shared handle to the mapping of `class_id`; `Ok(None)` for unknown classes.
    pub fn column_info(&self, class_id: ClassId) -> KeystoneResult<Option<Rc<ColumnInfo>>> {
        Ok(self.column_indices()?.column_info(class_id))
    }

    pub fn column_index(
        &self,
        class_id: ClassId,
        field_name: &str,
    ) -> KeystoneResult<Option<ColumnIndex>> {
        Ok(self.column_indices()?.column_index(class_id, field_name))
    }

    pub fn schema_version(&self) -> KeystoneResult<i64> {
        Ok(self.column_indices()?.schema_version())
    }

    /// Read-only deep copy, safe to hand to another thread.
    pub fn immutable_snapshot(&self) -> KeystoneResult<ColumnIndicesSnapshot> {
        let snapshot = self.column_indices()?.freeze();
        tracing::debug!(
            schema_version = snapshot.schema_version(),
            "Created immutable snapshot"
        );
        Ok(snapshot)
    }

    /// Add and drop cached classes so the class set matches `next`.
    pub fn sync_class_set(&mut self, next: &ColumnIndices) -> KeystoneResult<()> {
        self.indices
            .as_mut()
            .ok_or(StateError::NotInitialized)?
            .sync_class_set(next)
    }

    /// Refresh the installed indices from `next` in place. References
    /// handed out earlier observe the new mapping.
    pub fn update_column_indices(
        &mut self,
        next: &ColumnIndices,
        resolver: &dyn NameResolver,
    ) -> KeystoneResult<()> {
        self.indices
            .as_mut()
            .ok_or(StateError::NotInitialized)?
            .copy_from(next, resolver)
    }

    /// Release the indices. The cache cannot be initialised again.
    pub fn close(&mut self) {
        if self.indices.take().is_some() {
            tracing::debug!("Schema cache closed");
        }
        self.closed = true;
    }
}

// ============================================================================
// SCHEMA OWNER
// ============================================================================

/// Schema access for one open connection.
pub trait SchemaOwner {
    fn cache(&self) -> &SchemaCache;

    fn cache_mut(&mut self) -> &mut SchemaCache;

    // === Dynamic schema ===

    /// Current shape of `class_name`, `None` if it does not exist.
    fn get(&self, class_name: &str) -> Option<ClassSchema>;

    /// Every class, sorted by name.
    fn get_all(&self) -> Vec<ClassSchema>;

    /// Create a class with the given fields.
    fn create(&mut self, spec: ClassSpec) -> KeystoneResult<ClassSchema>;

    /// Remove a class. Fails while another class links to it.
    fn remove(&mut self, class_name: &str) -> KeystoneResult<()>;

    fn rename(
        &mut self,
        old_class_name: &str,
        new_class_name: &str,
    ) -> KeystoneResult<ClassSchema>;

    fn contains(&self, class_name: &str) -> bool;

    fn table(&self, class_name: &str) -> Option<TableHandle>;

    // === Queries ===

    /// Walk `field_path` starting at `table`. The type of the last segment
    /// must be one of `valid_types`.
    fn resolve_path(
        &self,
        table: &dyn Table,
        field_path: &str,
        valid_types: &[FieldType],
    ) -> KeystoneResult<ResolvedPath>;

    fn parse_field_path(&self, field_path: &str) -> KeystoneResult<Vec<String>> {
        parse_field_path(field_path)
    }

    // === Column indices ===

    fn set_initial_column_indices(&mut self, indices: &ColumnIndices) -> KeystoneResult<()> {
        self.cache_mut().set_initial_column_indices(indices)
    }

    fn set_initial_column_info(
        &mut self,
        schema_version: i64,
        classes: Vec<(ClassId, ColumnInfo)>,
    ) -> KeystoneResult<()> {
        self.cache_mut().set_initial_column_info(schema_version, classes)
    }

    fn column_info(&self, class_id: ClassId) -> KeystoneResult<Option<Rc<ColumnInfo>>> {
        self.cache().column_info(class_id)
    }

    fn column_index(
        &self,
        class_id: ClassId,
        field_name: &str,
    ) -> KeystoneResult<Option<ColumnIndex>> {
        self.cache().column_index(class_id, field_name)
    }

    fn schema_version(&self) -> KeystoneResult<i64> {
        self.cache().schema_version()
    }

    fn immutable_snapshot(&self) -> KeystoneResult<ColumnIndicesSnapshot> {
        self.cache().immutable_snapshot()
    }

    fn update_column_indices(
        &mut self,
        next: &ColumnIndices,
        resolver: &dyn NameResolver,
    ) -> KeystoneResult<()> {
        self.cache_mut().update_column_indices(next, resolver)
    }
}
