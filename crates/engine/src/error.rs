use std::collections::BTreeMap;
use std::fmt;

use optilock_core::{CoreError, FieldValue, RecordId, WriteId};
use optilock_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// SQLSTATE of a serialization failure; generic retry middleware keys on it.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Diagnosis of a lost optimistic-lock race.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub write_id: WriteId,
    pub collection: String,
    /// Ids whose version moved between the read and the guarded write.
    pub ids: Vec<RecordId>,
    pub attempted: BTreeMap<String, FieldValue>,
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {:?}", self.collection, self.ids, self.attempted)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("records deleted from {collection}: {ids:?}")]
    NotFound {
        collection: String,
        ids: Vec<RecordId>,
    },

    #[error("optimistic lock not available: {0}")]
    Conflict(Box<ConflictReport>),

    #[error("recursive hierarchy in {collection}: {id} cannot move under its own subtree")]
    Cycle { collection: String, id: RecordId },

    #[error("field {field} of {collection} is not stored in a column")]
    FieldRejected { collection: String, field: String },

    #[error("empty update batch for {0}")]
    EmptyBatch(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// SQLSTATE-style code for errors that retry middleware must recognise.
    pub fn sqlstate(&self) -> Option<&'static str> {
        self.is_retryable().then_some(SERIALIZATION_FAILURE)
    }

    /// True for lost optimistic races and for the store's own serialization
    /// failures. Both mean: re-read and run the whole operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Conflict(_) => true,
            EngineError::Storage(e) => e.is_serialization_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_report_renders_for_diagnostics() {
        let report = ConflictReport {
            write_id: WriteId::new(),
            collection: "partner".into(),
            ids: vec![RecordId::new(42)],
            attempted: BTreeMap::from([("name".to_string(), FieldValue::from("Azure"))]),
        };
        let rendered = toml::to_string(&report).unwrap();
        assert!(rendered.contains("collection = \"partner\""), "{rendered}");
        assert!(rendered.contains("ids = [42]"), "{rendered}");

        let err = EngineError::Conflict(Box::new(report));
        assert!(err.is_retryable());
        assert_eq!(err.sqlstate(), Some(SERIALIZATION_FAILURE));
        assert!(err.to_string().contains("partner"));
    }

    #[test]
    fn snapshot_failure_is_retryable() {
        let err = EngineError::from(StorageError::SerializationFailure("stale".into()));
        assert_eq!(err.sqlstate(), Some("40001"));
        let err = EngineError::from(StorageError::Autocommit);
        assert!(!err.is_retryable());
        assert_eq!(err.sqlstate(), None);
    }
}
