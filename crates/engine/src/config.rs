//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! chunk_size = 1000
//! busy_timeout_ms = 5000
//!
//! [registry.collections.category]
//! name = "category"
//! table = "product_category"
//! version_column = "write_date"
//!
//! [registry.collections.category.fields]
//! name = "column"
//! parent_id = "column"
//! child_ids = "delegated"
//!
//! [registry.collections.category.hierarchy]
//! parent_column = "parent_id"
//! order = ["name"]
//! ```

use std::path::Path;

use optilock_storage::{CollectionSchema, Registry, schema::DEFAULT_BUSY_TIMEOUT_MS};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on ids per guarded statement. The effective size may be
    /// lower when the statement would exceed the store's parameter limit.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Start sessions in autocommit mode.
    #[serde(default)]
    pub autocommit: bool,
    #[serde(default)]
    pub registry: Registry,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            autocommit: false,
            registry: Registry::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_collection(mut self, schema: CollectionSchema) -> Result<Self, EngineError> {
        self.registry.register(schema)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size must be positive".into()));
        }
        self.registry.validate()?;
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionSchema, EngineError> {
        Ok(self.registry.get(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optilock_storage::FieldClass;

    const SAMPLE: &str = r#"
chunk_size = 250

[registry.collections.category]
name = "category"
table = "product_category"
version_column = "write_date"

[registry.collections.category.fields]
name = "column"
parent_id = "column"
child_ids = "delegated"

[registry.collections.category.hierarchy]
parent_column = "parent_id"
order = ["name"]
"#;

    #[test]
    fn parses_registry_from_toml() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        let schema = config.collection("category").unwrap();
        assert_eq!(schema.table, "product_category");
        assert_eq!(schema.id_column, "id");
        assert!(schema.is_versioned());
        assert_eq!(schema.classify("child_ids"), FieldClass::Delegated);
        assert_eq!(schema.classify("parent_right"), FieldClass::Managed);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.autocommit);
        assert!(config.collection("anything").is_err());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(matches!(
            EngineConfig::from_toml_str("chunk_size = 0"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn rejects_unstored_parent_column() {
        let bad = SAMPLE.replace("parent_id = \"column\"", "parent_id = \"computed\"");
        assert!(EngineConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optilock.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert!(config.collection("category").is_ok());
        assert!(EngineConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
