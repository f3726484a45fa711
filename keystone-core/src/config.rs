//! Configuration types

use crate::error::{ConfigError, KeystoneResult};
use crate::{DEFAULT_TABLE_PREFIX, FIELD_PATH_SEPARATOR};
use serde::{Deserialize, Serialize};

/// Settings shared by column-info builders, registries and schema owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Prefix turning a class name into its table name.
    pub table_prefix: String,
    /// Compare declared field types with the on-disk column types.
    /// Column presence is checked regardless.
    pub verify_column_types: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            verify_column_types: true,
        }
    }
}

impl SchemaConfig {
    /// Build a configuration from `KEYSTONE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> KeystoneResult<Self> {
        let defaults = Self::default();
        let table_prefix =
            std::env::var("KEYSTONE_TABLE_PREFIX").unwrap_or(defaults.table_prefix);
        let verify_column_types = match std::env::var("KEYSTONE_VERIFY_COLUMN_TYPES") {
            Ok(raw) => parse_bool("verify_column_types", &raw)?,
            Err(_) => defaults.verify_column_types,
        };

        let config = Self {
            table_prefix,
            verify_column_types,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> KeystoneResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KeystoneResult<()> {
        if self.table_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "table_prefix".to_string(),
            }
            .into());
        }
        if self.table_prefix.contains(FIELD_PATH_SEPARATOR) {
            return Err(ConfigError::InvalidValue {
                field: "table_prefix".to_string(),
                value: self.table_prefix.clone(),
                reason: format!("must not contain '{FIELD_PATH_SEPARATOR}'"),
            }
            .into());
        }
        Ok(())
    }

    pub fn table_name_for_class(&self, class_name: &str) -> String {
        crate::table_name_for_class(&self.table_prefix, class_name)
    }

    pub fn class_name_for_table<'a>(&self, table_name: &'a str) -> &'a str {
        crate::class_name_for_table(&self.table_prefix, table_name)
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
