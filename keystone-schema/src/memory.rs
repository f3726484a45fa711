//! Schema owner over the in-memory table engine.

use crate::column_info::ColumnInfo;
use crate::owner::{
    parse_field_path, ClassSchema, FieldSchema, ResolvedPath, SchemaCache, SchemaOwner,
};
use crate::registry::{ClassRegistry, ClassSpec};
use keystone_core::{
    ArgumentError, ColumnIndex, FieldType, KeystoneResult, MigrationError, StateError,
};
use keystone_storage::{Connection, MemoryConnection, Table, TableHandle};
use std::rc::Rc;
use std::sync::Arc;

/// [`SchemaOwner`] for a [`MemoryConnection`].
///
/// Class-set changes made through the dynamic API are applied to the
/// connection and the registry immediately. The cached column indices only
/// follow after [`MemorySchema::refresh`].
#[derive(Debug)]
pub struct MemorySchema {
    connection: Arc<MemoryConnection>,
    registry: ClassRegistry,
    cache: SchemaCache,
    needs_refresh: bool,
}

impl MemorySchema {
    /// Validate every registered class against `connection` and install the
    /// resulting generation.
    pub fn open(
        connection: Arc<MemoryConnection>,
        registry: ClassRegistry,
        schema_version: i64,
    ) -> KeystoneResult<Self> {
        let indices = registry.build_indices(connection.as_ref(), schema_version)?;
        let mut cache = SchemaCache::new();
        cache.set_initial_column_indices(&indices)?;
        tracing::info!(
            path = connection.path(),
            schema_version,
            classes = registry.len(),
            "Schema opened"
        );
        Ok(Self {
            connection,
            registry,
            cache,
            needs_refresh: false,
        })
    }

    pub fn connection(&self) -> &Arc<MemoryConnection> {
        &self.connection
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// True after a class-set change until the next successful refresh.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Rebuild the generation from the registry and apply it to the cache.
    ///
    /// Classes created since the last refresh join the cache and removed
    /// classes leave it; every other class is updated in place.
    pub fn refresh(&mut self, schema_version: i64) -> KeystoneResult<()> {
        let next = self
            .registry
            .build_indices(self.connection.as_ref(), schema_version)?;
        self.cache.sync_class_set(&next)?;
        self.cache.update_column_indices(&next, &self.registry)?;
        self.needs_refresh = false;
        Ok(())
    }

    pub fn close(mut self) {
        self.cache.close();
        tracing::info!(path = self.connection.path(), "Schema closed");
    }

    /// Column mapping for `class_name`. Classes created after the last
    /// refresh are not in the cache and get a freshly built mapping.
    fn column_info_for(&self, class_name: &str) -> KeystoneResult<Rc<ColumnInfo>> {
        let class_id = self
            .registry
            .class_id(class_name)
            .ok_or_else(|| ArgumentError::UnknownClass {
                class_name: class_name.to_string(),
            })?;
        match self.cache.column_info(class_id)? {
            Some(info) => Ok(info),
            None => Ok(Rc::new(
                self.registry
                    .build_column_info(self.connection.as_ref(), class_id)?,
            )),
        }
    }

    fn class_table(&self, class_name: &str) -> Option<TableHandle> {
        self.connection
            .table(&self.registry.config().table_name_for_class(class_name))
    }

    fn describe(&self, class_name: &str) -> Option<ClassSchema> {
        self.registry.class_id(class_name)?;
        let table = self.class_table(class_name)?;
        let mut fields: Vec<FieldSchema> = (0..table.column_count() as ColumnIndex)
            .filter_map(|index| {
                Some(FieldSchema {
                    name: table.column_name(index)?,
                    field_type: table.column_type(index),
                    linked_class: table.link_target(index).map(|t| t.class_name()),
                })
            })
            .collect();

        if let Some(spec) = self.registry.spec_by_name(class_name) {
            fields.extend(spec.fields.iter().filter_map(|field| {
                let source = field.backlink.as_ref()?;
                Some(FieldSchema {
                    name: field.name.clone(),
                    field_type: FieldType::Backlink,
                    linked_class: Some(source.source_class.clone()),
                })
            }));
        }

        Some(ClassSchema {
            class_name: class_name.to_string(),
            fields,
        })
    }

    fn create_columns(&self, spec: &ClassSpec) -> KeystoneResult<()> {
        let table = self.connection.create_table(&spec.class_name)?;
        for field in spec.fields.iter().filter(|f| f.backlink.is_none()) {
            if field.field_type.is_link() {
                let target_name = field.linked_class.as_deref().ok_or_else(|| {
                    ArgumentError::UnknownClass {
                        class_name: format!("{}.{}", spec.class_name, field.name),
                    }
                })?;
                let target = self.connection.class_table(target_name).ok_or_else(|| {
                    ArgumentError::UnknownClass {
                        class_name: target_name.to_string(),
                    }
                })?;
                table.add_link_column(&field.name, field.field_type, &target)?;
            } else {
                table.add_column(&field.name, field.field_type)?;
            }
        }
        Ok(())
    }
}

impl SchemaOwner for MemorySchema {
    fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut SchemaCache {
        &mut self.cache
    }

    fn get(&self, class_name: &str) -> Option<ClassSchema> {
        self.describe(class_name)
    }

    fn get_all(&self) -> Vec<ClassSchema> {
        let mut all: Vec<ClassSchema> = self
            .registry
            .class_ids()
            .filter_map(|id| self.registry.spec(id))
            .filter_map(|spec| self.describe(&spec.class_name))
            .collect();
        all.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        all
    }

    fn create(&mut self, spec: ClassSpec) -> KeystoneResult<ClassSchema> {
        if spec.class_name.is_empty() {
            return Err(ArgumentError::EmptyClassName.into());
        }
        if self.registry.class_id(&spec.class_name).is_some()
            || self.connection.class_table(&spec.class_name).is_some()
        {
            return Err(StateError::ClassAlreadyExists {
                class_name: spec.class_name,
            }
            .into());
        }

        // Backlinks have no column of their own; building the mapping
        // checks their sources.
        let built = self.create_columns(&spec).and_then(|()| {
            spec.build_column_info(self.connection.as_ref(), self.registry.config())
        });
        if let Err(e) = built {
            // Drop the half-built table.
            let _ = self.connection.remove_table(&spec.class_name);
            return Err(e);
        }
        let class_name = spec.class_name.clone();
        let class_id = self.registry.register(spec)?;
        self.needs_refresh = true;
        tracing::info!(class = %class_name, class_id = %class_id, "Class created");

        self.describe(&class_name).ok_or_else(|| {
            StateError::ClassNotFound {
                class_name: class_name.clone(),
            }
            .into()
        })
    }

    fn remove(&mut self, class_name: &str) -> KeystoneResult<()> {
        let class_id = self
            .registry
            .class_id(class_name)
            .ok_or_else(|| StateError::ClassNotFound {
                class_name: class_name.to_string(),
            })?;
        let referenced_by = self.registry.backlinks_from(class_name).into_iter().next();
        if let Some(referenced_by) = referenced_by {
            return Err(StateError::ClassStillReferenced {
                class_name: class_name.to_string(),
                referenced_by,
            }
            .into());
        }
        self.connection.remove_table(class_name)?;
        self.registry.unregister(class_id);
        self.needs_refresh = true;
        tracing::info!(class = class_name, class_id = %class_id, "Class removed");
        Ok(())
    }

    fn rename(
        &mut self,
        old_class_name: &str,
        new_class_name: &str,
    ) -> KeystoneResult<ClassSchema> {
        let class_id = self
            .registry
            .class_id(old_class_name)
            .ok_or_else(|| StateError::ClassNotFound {
                class_name: old_class_name.to_string(),
            })?;
        if self.registry.class_id(new_class_name).is_some() {
            return Err(StateError::ClassAlreadyExists {
                class_name: new_class_name.to_string(),
            }
            .into());
        }
        self.connection.rename_table(old_class_name, new_class_name)?;
        if let Err(e) = self.registry.rename(class_id, new_class_name) {
            let _ = self.connection.rename_table(new_class_name, old_class_name);
            return Err(e);
        }
        self.needs_refresh = true;
        tracing::info!(from = old_class_name, to = new_class_name, "Class renamed");

        self.describe(new_class_name).ok_or_else(|| {
            StateError::ClassNotFound {
                class_name: new_class_name.to_string(),
            }
            .into()
        })
    }

    fn contains(&self, class_name: &str) -> bool {
        self.registry.class_id(class_name).is_some() && self.class_table(class_name).is_some()
    }

    fn table(&self, class_name: &str) -> Option<TableHandle> {
        self.registry.class_id(class_name)?;
        self.class_table(class_name)
    }

    fn resolve_path(
        &self,
        table: &dyn Table,
        field_path: &str,
        valid_types: &[FieldType],
    ) -> KeystoneResult<ResolvedPath> {
        let segments = parse_field_path(field_path)?;
        let last = segments.len() - 1;

        let mut class_name = table.class_name();
        let mut column_indices = Vec::with_capacity(segments.len());
        let mut tables = Vec::with_capacity(segments.len());
        let mut final_type = FieldType::Unsupported;

        for (i, segment) in segments.iter().enumerate() {
            let info = self.column_info_for(&class_name)?;
            let descriptor = info
                .descriptor(segment)
                .ok_or_else(|| ArgumentError::FieldNotFound {
                    class_name: class_name.clone(),
                    field_name: segment.clone(),
                })?;
            let field_type = descriptor.field_type();

            if i < last && !field_type.is_relationship() {
                return Err(ArgumentError::NotALink {
                    class_name,
                    field_name: segment.clone(),
                    found: field_type,
                }
                .into());
            }

            column_indices.push(descriptor.index());
            match descriptor.linked_class().filter(|_| field_type.is_relationship()) {
                Some(target) => {
                    let target_table = self.class_table(target).ok_or_else(|| {
                        MigrationError::MissingLinkTarget {
                            path: self.connection.path().to_string(),
                            class_name: class_name.clone(),
                            field_name: segment.clone(),
                        }
                    })?;
                    tables.push(Some(target_table));
                    class_name = target.to_string();
                }
                None => tables.push(None),
            }
            final_type = field_type;
        }

        if !valid_types.contains(&final_type) {
            return Err(ArgumentError::UnexpectedType {
                field_name: field_path.to_string(),
                found: final_type,
                expected: valid_types.to_vec(),
            }
            .into());
        }

        tracing::trace!(
            path = field_path,
            segments = column_indices.len(),
            "Resolved field path"
        );
        Ok(ResolvedPath {
            column_indices,
            tables,
            final_type,
        })
    }
}
