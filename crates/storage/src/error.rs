use optilock_core::RecordId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store aborted the statement because a concurrent transaction
    /// committed first.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record {0} has no interval bounds")]
    Unpositioned(RecordId),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("a transaction is active on this connection")]
    TransactionActive,

    #[error("connection is in autocommit mode")]
    Autocommit,

    #[error("core error: {0}")]
    Core(#[from] optilock_core::CoreError),
}

impl StorageError {
    /// Classifies a write failure. Any busy result on a write means another
    /// transaction holds or has already committed the write lock since this
    /// one started reading: a stale snapshot (`SQLITE_BUSY_SNAPSHOT`), or a
    /// reader that cannot be upgraded while another writer is uncommitted,
    /// which SQLite reports at once without consulting the busy handler.
    pub fn from_write(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::DatabaseBusy => {
                let reason = if e.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT {
                    "database snapshot is stale"
                } else {
                    "write lock held by a concurrent transaction"
                };
                StorageError::SerializationFailure(msg.clone().unwrap_or_else(|| reason.to_string()))
            }
            _ => StorageError::Sqlite(err),
        }
    }

    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, StorageError::SerializationFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn busy_writes_are_serialization_failures() {
        assert!(StorageError::from_write(failure(ffi::SQLITE_BUSY)).is_serialization_failure());
        assert!(StorageError::from_write(failure(ffi::SQLITE_BUSY_SNAPSHOT)).is_serialization_failure());
    }

    #[test]
    fn other_write_errors_pass_through() {
        let err = StorageError::from_write(failure(ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, StorageError::Sqlite(_)));
        assert!(!err.is_serialization_failure());
    }
}
