//! Whole-schema column-index cache.

use crate::column_info::ColumnInfo;
use crate::snapshot::ColumnIndicesSnapshot;
use keystone_core::{
    class_name_for_table, ClassId, ColumnIndex, KeystoneResult, NameResolver, StateError,
};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Mapping from class to [`ColumnInfo`] at one schema generation.
///
/// A connection owns exactly one mutable instance. Immutable instances are
/// produced with [`ColumnIndices::snapshot`] and share nothing with the
/// original. Neither kind leaves the owning thread; [`ColumnIndices::freeze`]
/// produces the `Send` form.
///
/// ```compile_fail
/// fn require_send<T: Send>() {}
/// require_send::<keystone_schema::ColumnIndices>();
/// ```
#[derive(Debug)]
pub struct ColumnIndices {
    schema_version: i64,
    classes: BTreeMap<ClassId, Rc<ColumnInfo>>,
    mutable: bool,
}

impl ColumnIndices {
    /// Take ownership of freshly built column infos. The result, and every
    /// info inside it, is mutable; immutable inputs are replaced by mutable
    /// copies.
    pub fn new(
        schema_version: i64,
        classes: impl IntoIterator<Item = (ClassId, ColumnInfo)>,
    ) -> Self {
        Self {
            schema_version,
            classes: classes
                .into_iter()
                .map(|(id, info)| {
                    let info = if info.is_mutable() { info } else { info.copy(true) };
                    (id, Rc::new(info))
                })
                .collect(),
            mutable: true,
        }
    }

    /// Deep copy with the requested mutability. Every [`ColumnInfo`] is
    /// cloned, so the copy and `self` evolve independently.
    pub fn snapshot(&self, mutable: bool) -> Self {
        Self {
            schema_version: self.schema_version,
            classes: self
                .classes
                .iter()
                .map(|(id, info)| (*id, Rc::new(info.copy(mutable))))
                .collect(),
            mutable,
        }
    }

    /// Owned, read-only copy that can be sent to other threads.
    pub fn freeze(&self) -> ColumnIndicesSnapshot {
        ColumnIndicesSnapshot::new(
            self.schema_version,
            self.classes.iter().map(|(id, info)| (*id, info.to_map())),
        )
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Shared handle to the mapping of `class_id`. The handle observes later
    /// [`copy_from`](Self::copy_from) calls on this instance.
    pub fn column_info(&self, class_id: ClassId) -> Option<Rc<ColumnInfo>> {
        self.classes.get(&class_id).cloned()
    }

    /// Column position of `field_name` on `class_id`, `None` if either is unknown.
    pub fn column_index(&self, class_id: ClassId, field_name: &str) -> Option<ColumnIndex> {
        self.classes.get(&class_id)?.column_index(field_name)
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

    /// Refresh every class mapping from `other` and adopt its schema version.
    ///
    /// Classes are visited in ascending [`ClassId`] order. The first class
    /// of `self` with no counterpart in `other` aborts the call with
    /// `InvalidState`; classes visited before it keep their new mappings and
    /// the schema version is left unchanged. Classes only present in `other`
    /// are ignored. `resolver` is used for the error message only.
    pub fn copy_from(
        &mut self,
        other: &ColumnIndices,
        resolver: &dyn NameResolver,
    ) -> KeystoneResult<()> {
        if !self.mutable {
            return Err(StateError::ImmutableCache.into());
        }
        for (id, info) in &self.classes {
            let Some(source) = other.classes.get(id) else {
                let table_name = resolver.table_name(*id);
                tracing::error!(
                    class_id = %id,
                    table = %table_name,
                    "Class missing from new schema generation"
                );
                return Err(StateError::ClassSetMismatch {
                    class_name: class_name_for_table(resolver.table_prefix(), &table_name)
                        .to_string(),
                }
                .into());
            };
            info.copy_from(source)?;
        }
        tracing::info!(
            from = self.schema_version,
            to = other.schema_version,
            classes = self.classes.len(),
            "Column indices updated"
        );
        self.schema_version = other.schema_version;
        Ok(())
    }

    /// Align the set of cached classes with `other` ahead of a
    /// [`copy_from`](Self::copy_from).
    ///
    /// Classes only present in `other` are added as mutable copies and
    /// classes missing from `other` are dropped. Surviving classes keep
    /// their handles and mappings. Handles to a dropped class stay readable
    /// but no longer receive updates.
    pub fn sync_class_set(&mut self, other: &ColumnIndices) -> KeystoneResult<()> {
        if !self.mutable {
            return Err(StateError::ImmutableCache.into());
        }
        let before = self.classes.len();
        self.classes.retain(|id, _| other.classes.contains_key(id));
        let dropped = before - self.classes.len();

        let mut added = 0usize;
        for (id, info) in &other.classes {
            if let Entry::Vacant(slot) = self.classes.entry(*id) {
                slot.insert(Rc::new(info.copy(true)));
                added += 1;
            }
        }
        if added > 0 || dropped > 0 {
            tracing::debug!(added, dropped, "Cached class set changed");
        }
        Ok(())
    }
}

impl fmt::Display for ColumnIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnIndices[{},{}", self.schema_version, self.mutable)?;
        for info in self.classes.values() {
            write!(f, ",{}->{}", info.class_name(), info)?;
        }
        f.write_str("]")
    }
}
