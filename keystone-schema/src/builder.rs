//! Two-phase construction of [`ColumnInfo`].
//!
//! The builder validates every declared field against the physical table
//! and accumulates descriptors; [`ColumnInfoBuilder::build`] freezes them.
//! `add_column` and `add_backlink` only exist on the builder, so a finished
//! `ColumnInfo` can never grow new fields.

use crate::column_info::{ColumnDescriptor, ColumnInfo, ColumnMap};
use keystone_core::{
    ArgumentError, ColumnIndex, FieldType, KeystoneResult, MigrationError, SchemaConfig,
};
use keystone_storage::{Connection, TableHandle};
use std::collections::HashMap;

pub struct ColumnInfoBuilder<'a> {
    connection: &'a dyn Connection,
    config: &'a SchemaConfig,
    table: TableHandle,
    class_name: String,
    columns: HashMap<String, ColumnDescriptor>,
}

impl<'a> ColumnInfoBuilder<'a> {
    /// Start building the mapping for `class_name`.
    ///
    /// Fails with `MigrationNeeded` if the connection has no table for the class.
    pub fn new(
        connection: &'a dyn Connection,
        class_name: &str,
        config: &'a SchemaConfig,
    ) -> KeystoneResult<Self> {
        let table = connection
            .table(&config.table_name_for_class(class_name))
            .ok_or_else(|| {
                tracing::warn!(path = connection.path(), class = class_name, "Class table missing");
                MigrationError::MissingClass {
                    path: connection.path().to_string(),
                    class_name: class_name.to_string(),
                }
            })?;

        Ok(Self {
            connection,
            config,
            table,
            class_name: class_name.to_string(),
            columns: HashMap::new(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn table(&self) -> &TableHandle {
        &self.table
    }

    fn reserve(&self, field_name: &str) -> KeystoneResult<()> {
        if self.columns.contains_key(field_name) {
            return Err(ArgumentError::DuplicateField {
                class_name: self.class_name.clone(),
                field_name: field_name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn migration_needed(&self, err: MigrationError) -> MigrationError {
        tracing::warn!(
            path = self.connection.path(),
            class = %self.class_name,
            field = err.field_name().unwrap_or_default(),
            "{err}"
        );
        err
    }

    /// Record a forward column and return its position.
    ///
    /// The column must exist in the class table. When type verification is
    /// enabled its on-disk type must equal `expected`. Links record the class
    /// name of their target table.
    pub fn add_column(
        &mut self,
        field_name: &str,
        expected: FieldType,
    ) -> KeystoneResult<ColumnIndex> {
        self.reserve(field_name)?;

        let index = self.table.column_index(field_name).ok_or_else(|| {
            self.migration_needed(MigrationError::MissingField {
                path: self.connection.path().to_string(),
                class_name: self.class_name.clone(),
                field_name: field_name.to_string(),
            })
        })?;

        let actual = self.table.column_type(index);
        if self.config.verify_column_types && actual != expected {
            return Err(self
                .migration_needed(MigrationError::TypeMismatch {
                    path: self.connection.path().to_string(),
                    class_name: self.class_name.clone(),
                    field_name: field_name.to_string(),
                    expected,
                    found: actual,
                })
                .into());
        }

        let linked_class = if actual.is_link() {
            let target = self.table.link_target(index).ok_or_else(|| {
                self.migration_needed(MigrationError::MissingLinkTarget {
                    path: self.connection.path().to_string(),
                    class_name: self.class_name.clone(),
                    field_name: field_name.to_string(),
                })
            })?;
            Some(target.class_name())
        } else {
            None
        };

        self.columns.insert(
            field_name.to_string(),
            ColumnDescriptor::column(index, actual, linked_class),
        );
        Ok(index)
    }

    /// Record a backlink: `field_name` on this class lists every
    /// `source_class` object whose `source_field` points here.
    ///
    /// The stored index is the position of `source_field` in the source table.
    pub fn add_backlink(
        &mut self,
        field_name: &str,
        source_class: &str,
        source_field: &str,
    ) -> KeystoneResult<ColumnIndex> {
        self.reserve(field_name)?;

        let missing_source = || MigrationError::MissingBacklinkSource {
            path: self.connection.path().to_string(),
            class_name: self.class_name.clone(),
            field_name: field_name.to_string(),
            source_class: source_class.to_string(),
            source_field: source_field.to_string(),
        };

        let source_table = self
            .connection
            .table(&self.config.table_name_for_class(source_class))
            .ok_or_else(|| self.migration_needed(missing_source()))?;
        let index = source_table
            .column_index(source_field)
            .ok_or_else(|| self.migration_needed(missing_source()))?;

        if self.config.verify_column_types {
            let source_type = source_table.column_type(index);
            if !source_type.is_link() {
                return Err(self
                    .migration_needed(MigrationError::TypeMismatch {
                        path: self.connection.path().to_string(),
                        class_name: source_class.to_string(),
                        field_name: source_field.to_string(),
                        expected: FieldType::Object,
                        found: source_type,
                    })
                    .into());
            }
            let points_here = source_table
                .link_target(index)
                .is_some_and(|t| t.class_name() == self.class_name);
            if !points_here {
                return Err(self.migration_needed(missing_source()).into());
            }
        }

        self.columns.insert(
            field_name.to_string(),
            ColumnDescriptor::backlink(index, source_class, source_field),
        );
        Ok(index)
    }

    /// Freeze the accumulated descriptors into a mutable working `ColumnInfo`.
    pub fn build(self) -> ColumnInfo {
        tracing::debug!(class = %self.class_name, fields = self.columns.len(), "Built column info");
        ColumnInfo::from_map(
            ColumnMap {
                class_name: self.class_name,
                columns: self.columns,
            },
            true,
        )
    }
}
