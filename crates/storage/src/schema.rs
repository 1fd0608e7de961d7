use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Upper bound on bound parameters per statement in the bundled SQLite.
pub const MAX_PARAMS: usize = 32766;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

pub fn init_connection(conn: &Connection, busy_timeout_ms: u64) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
    ",
    )?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// How a field is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Backed by a column of the collection's table.
    Column,
    /// Derived from other fields; writes go through its inverse.
    Computed,
    /// Stored elsewhere (link tables, parent records).
    Delegated,
}

/// Capability tag of a write target, resolved from the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Column,
    Computed,
    Delegated,
    /// Owned by the engine: the version marker and the interval bounds.
    Managed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchySpec {
    pub parent_column: String,
    #[serde(default = "default_left_column")]
    pub left_column: String,
    #[serde(default = "default_right_column")]
    pub right_column: String,
    /// Sibling ordering key, ascending; the identity column breaks ties.
    #[serde(default)]
    pub order: Vec<String>,
}

fn default_left_column() -> String {
    "parent_left".to_string()
}

fn default_right_column() -> String {
    "parent_right".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Present when the collection opts into optimistic locking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_column: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchySpec>,
}

impl CollectionSchema {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            id_column: default_id_column(),
            version_column: None,
            fields: BTreeMap::new(),
            hierarchy: None,
        }
    }

    pub fn with_version(mut self, column: &str) -> Self {
        self.version_column = Some(column.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    /// Declares the nested-set columns. The parent column is registered as a
    /// column field.
    pub fn with_hierarchy(mut self, parent_column: &str, order: &[&str]) -> Self {
        self.fields.insert(parent_column.to_string(), FieldKind::Column);
        self.hierarchy = Some(HierarchySpec {
            parent_column: parent_column.to_string(),
            left_column: default_left_column(),
            right_column: default_right_column(),
            order: order.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn is_versioned(&self) -> bool {
        self.version_column.is_some()
    }

    pub fn hierarchy(&self) -> Result<&HierarchySpec, StorageError> {
        self.hierarchy
            .as_ref()
            .ok_or_else(|| StorageError::InvalidSchema(format!("{} is not hierarchical", self.name)))
    }

    pub fn classify(&self, field: &str) -> FieldClass {
        if self.version_column.as_deref() == Some(field) {
            return FieldClass::Managed;
        }
        if let Some(h) = &self.hierarchy {
            if h.left_column == field || h.right_column == field {
                return FieldClass::Managed;
            }
        }
        match self.fields.get(field) {
            Some(FieldKind::Column) => FieldClass::Column,
            Some(FieldKind::Computed) => FieldClass::Computed,
            Some(FieldKind::Delegated) => FieldClass::Delegated,
            None => FieldClass::Unknown,
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        let mut idents = vec![self.table.as_str(), self.id_column.as_str()];
        idents.extend(self.version_column.as_deref());
        if let Some(h) = &self.hierarchy {
            if self.fields.get(&h.parent_column) != Some(&FieldKind::Column) {
                return Err(StorageError::InvalidSchema(format!(
                    "{}: parent column {} must be a column field",
                    self.name, h.parent_column
                )));
            }
            for col in &h.order {
                if col != &self.id_column && self.fields.get(col) != Some(&FieldKind::Column) {
                    return Err(StorageError::InvalidSchema(format!(
                        "{}: order column {col} must be a column field",
                        self.name
                    )));
                }
            }
            idents.extend([h.left_column.as_str(), h.right_column.as_str()]);
        }
        if let Some(bad) = idents.iter().find(|s| s.is_empty()) {
            return Err(StorageError::InvalidSchema(format!(
                "{}: empty identifier {bad:?}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Collection schemas resolved once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    collections: BTreeMap<String, CollectionSchema>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: CollectionSchema) -> Result<(), StorageError> {
        schema.validate()?;
        self.collections.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&CollectionSchema, StorageError> {
        self.collections
            .get(name)
            .ok_or_else(|| StorageError::UnknownCollection(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        for (key, schema) in &self.collections {
            if key != &schema.name {
                return Err(StorageError::InvalidSchema(format!(
                    "collection registered as {key} is named {}",
                    schema.name
                )));
            }
            schema.validate()?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }
}

/// Quotes an SQL identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
