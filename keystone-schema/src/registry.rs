//! Declarative model description and the class registry.
//!
//! Each model class is described by a [`ClassSpec`]: its name plus an ordered
//! list of [`FieldSpec`]s. The [`ClassRegistry`] assigns every class a stable
//! [`ClassId`] and turns specs into column mappings against a connection.

use crate::builder::ColumnInfoBuilder;
use crate::column_indices::ColumnIndices;
use crate::column_info::ColumnInfo;
use keystone_core::{
    ArgumentError, ClassId, FieldType, KeystoneResult, NameResolver, SchemaConfig, StateError,
};
use keystone_storage::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Where a backlink field reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklinkSpec {
    pub source_class: String,
    pub source_field: String,
}

/// One declared model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Target class of a link. Only needed to create the column; existing
    /// tables report their own targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlink: Option<BacklinkSpec>,
}

impl FieldSpec {
    pub fn column(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            linked_class: None,
            backlink: None,
        }
    }

    pub fn link(name: impl Into<String>, field_type: FieldType, target: impl Into<String>) -> Self {
        Self {
            linked_class: Some(target.into()),
            ..Self::column(name, field_type)
        }
    }

    pub fn backlink(
        name: impl Into<String>,
        source_class: impl Into<String>,
        source_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Backlink,
            linked_class: None,
            backlink: Some(BacklinkSpec {
                source_class: source_class.into(),
                source_field: source_field.into(),
            }),
        }
    }
}

/// A model class and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub class_name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl ClassSpec {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec::column(name, field_type));
        self
    }

    pub fn link(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        target: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec::link(name, field_type, target));
        self
    }

    pub fn backlink(
        mut self,
        name: impl Into<String>,
        source_class: impl Into<String>,
        source_field: impl Into<String>,
    ) -> Self {
        self.fields
            .push(FieldSpec::backlink(name, source_class, source_field));
        self
    }

    /// Validate every field against `connection` and build the mapping.
    pub fn build_column_info(
        &self,
        connection: &dyn Connection,
        config: &SchemaConfig,
    ) -> KeystoneResult<ColumnInfo> {
        let mut builder = ColumnInfoBuilder::new(connection, &self.class_name, config)?;
        for field in &self.fields {
            match &field.backlink {
                Some(source) => {
                    builder.add_backlink(&field.name, &source.source_class, &source.source_field)?;
                }
                None => {
                    builder.add_column(&field.name, field.field_type)?;
                }
            }
        }
        Ok(builder.build())
    }
}

/// Registry of model classes, keyed by stable [`ClassId`].
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    config: SchemaConfig,
    classes: BTreeMap<ClassId, ClassSpec>,
    by_name: HashMap<String, ClassId>,
    // Last names of unregistered classes, for diagnostics.
    retired: HashMap<ClassId, String>,
    next_id: u32,
}

impl ClassRegistry {
    pub fn new(config: SchemaConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Build a registry from a JSON array of class specs.
    pub fn from_json(config: SchemaConfig, raw: &str) -> Result<Self, RegistryLoadError> {
        let specs: Vec<ClassSpec> = serde_json::from_str(raw)?;
        let mut registry = Self::new(config);
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Register a class and return its identifier.
    pub fn register(&mut self, spec: ClassSpec) -> KeystoneResult<ClassId> {
        if spec.class_name.is_empty() {
            return Err(ArgumentError::EmptyClassName.into());
        }
        if self.by_name.contains_key(&spec.class_name) {
            return Err(ArgumentError::DuplicateClass {
                class_name: spec.class_name,
            }
            .into());
        }
        let next_id = self
            .next_id
            .checked_add(1)
            .ok_or(StateError::ClassIdsExhausted)?;
        let id = ClassId::new(self.next_id);
        self.next_id = next_id;
        self.by_name.insert(spec.class_name.clone(), id);
        self.classes.insert(id, spec);
        Ok(id)
    }

    /// Forget a class. Its identifier is never handed out again.
    pub fn unregister(&mut self, class_id: ClassId) -> Option<ClassSpec> {
        let spec = self.classes.remove(&class_id)?;
        self.by_name.remove(&spec.class_name);
        self.retired.insert(class_id, spec.class_name.clone());
        Some(spec)
    }

    /// Point `class_id` at a new class name, e.g. after a table rename.
    /// Link targets and backlink sources naming the old class follow it.
    pub fn rename(&mut self, class_id: ClassId, new_name: &str) -> KeystoneResult<()> {
        if self.by_name.contains_key(new_name) {
            return Err(ArgumentError::DuplicateClass {
                class_name: new_name.to_string(),
            }
            .into());
        }
        let spec = self
            .classes
            .get_mut(&class_id)
            .ok_or_else(|| ArgumentError::UnknownClass {
                class_name: class_id.to_string(),
            })?;
        let old_name = std::mem::replace(&mut spec.class_name, new_name.to_string());
        self.by_name.remove(&old_name);
        self.by_name.insert(new_name.to_string(), class_id);

        for field in self.classes.values_mut().flat_map(|c| c.fields.iter_mut()) {
            if field.linked_class.as_deref() == Some(old_name.as_str()) {
                field.linked_class = Some(new_name.to_string());
            }
            if let Some(source) = field.backlink.as_mut() {
                if source.source_class == old_name {
                    source.source_class = new_name.to_string();
                }
            }
        }
        Ok(())
    }

    pub fn class_id(&self, class_name: &str) -> Option<ClassId> {
        self.by_name.get(class_name).copied()
    }

    pub fn spec(&self, class_id: ClassId) -> Option<&ClassSpec> {
        self.classes.get(&class_id)
    }

    pub fn spec_by_name(&self, class_name: &str) -> Option<&ClassSpec> {
        self.spec(self.class_id(class_name)?)
    }

    /// Registered classes, other than `class_name` itself, with a backlink
    /// reading from `class_name`. Returned as `Class.field`.
    pub fn backlinks_from(&self, class_name: &str) -> Vec<String> {
        self.classes
            .values()
            .filter(|spec| spec.class_name != class_name)
            .flat_map(|spec| {
                spec.fields
                    .iter()
                    .filter(|f| {
                        f.backlink
                            .as_ref()
                            .is_some_and(|b| b.source_class == class_name)
                    })
                    .map(move |f| format!("{}.{}", spec.class_name, f.name))
            })
            .collect()
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

    /// Build the column mapping of one registered class.
    pub fn build_column_info(
        &self,
        connection: &dyn Connection,
        class_id: ClassId,
    ) -> KeystoneResult<ColumnInfo> {
        let spec = self
            .classes
            .get(&class_id)
            .ok_or_else(|| ArgumentError::UnknownClass {
                class_name: class_id.to_string(),
            })?;
        spec.build_column_info(connection, &self.config)
    }

    /// Build a whole schema generation. The first class that disagrees with
    /// the connection aborts the build.
    pub fn build_indices(
        &self,
        connection: &dyn Connection,
        schema_version: i64,
    ) -> KeystoneResult<ColumnIndices> {
        let mut classes = BTreeMap::new();
        for (id, spec) in &self.classes {
            classes.insert(*id, spec.build_column_info(connection, &self.config)?);
        }
        tracing::debug!(
            schema_version,
            classes = classes.len(),
            "Built column indices generation"
        );
        Ok(ColumnIndices::new(schema_version, classes))
    }
}

impl NameResolver for ClassRegistry {
    fn table_name(&self, class_id: ClassId) -> String {
        let class_name = self
            .classes
            .get(&class_id)
            .map(|spec| spec.class_name.as_str())
            .or_else(|| self.retired.get(&class_id).map(String::as_str));
        match class_name {
            Some(name) => self.config.table_name_for_class(name),
            None => class_id.to_string(),
        }
    }

    fn table_prefix(&self) -> &str {
        &self.config.table_prefix
    }
}

/// Failure loading a registry from JSON.
#[derive(Debug, thiserror::Error)]
pub enum RegistryLoadError {
    #[error("Malformed class specs: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] keystone_core::KeystoneError),
}
