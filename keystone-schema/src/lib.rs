//! Keystone Schema - Column-Index Cache
//!
//! Maps model fields to physical column positions for every class of an
//! open connection:
//!
//! - [`ColumnInfo`]: field name to [`ColumnDescriptor`] for one class, built
//!   by a [`ColumnInfoBuilder`] that validates the model against the table.
//! - [`ColumnIndices`]: every class at one schema generation, confined to
//!   the connection's thread. [`ColumnIndicesSnapshot`] is the frozen copy
//!   that can be sent to other threads.
//! - [`SchemaCache`] / [`SchemaOwner`]: the per-connection holder, set once
//!   and refreshed in place on migration.
//! - [`MemorySchema`]: the owner for [`keystone_storage::MemoryConnection`].

pub mod builder;
pub mod column_indices;
pub mod column_info;
pub mod memory;
pub mod owner;
pub mod registry;
pub mod snapshot;

pub use builder::ColumnInfoBuilder;
pub use column_indices::ColumnIndices;
pub use column_info::{BacklinkSource, ColumnDescriptor, ColumnInfo, ColumnMap};
pub use memory::MemorySchema;
pub use owner::{
    parse_field_path, ClassSchema, FieldSchema, ResolvedPath, SchemaCache, SchemaOwner,
};
pub use registry::{BacklinkSpec, ClassRegistry, ClassSpec, FieldSpec, RegistryLoadError};
pub use snapshot::ColumnIndicesSnapshot;

pub use keystone_core::{
    ClassId, ColumnIndex, FieldType, KeystoneError, KeystoneResult, NameResolver, SchemaConfig,
};
