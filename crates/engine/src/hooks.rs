use optilock_core::{FieldValue, RecordId};

use crate::error::EngineError;

/// Collaborators around a write: access checks, non-column fields, and
/// recomputation of derived values. Every method defaults to doing nothing.
pub trait WriteHooks {
    /// Called before any statement runs.
    fn check_write(&mut self, _collection: &str, _ids: &[RecordId], _fields: &[String]) -> Result<(), EngineError> {
        Ok(())
    }

    /// Stores a field that lives outside the collection's table.
    fn write_delegated(
        &mut self,
        _collection: &str,
        _ids: &[RecordId],
        _field: &str,
        _value: &FieldValue,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Writes through the inverse of a computed field.
    fn write_inverse(
        &mut self,
        _collection: &str,
        _ids: &[RecordId],
        _field: &str,
        _value: &FieldValue,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Fields of `ids` changed; dependent cached values are stale.
    fn modified(&mut self, _collection: &str, _ids: &[RecordId], _fields: &[String]) {}

    /// The write is complete; recompute what depends on it.
    fn recompute(&mut self, _collection: &str, _ids: &[RecordId]) -> Result<(), EngineError> {
        Ok(())
    }
}

pub struct NoHooks;

impl WriteHooks for NoHooks {}
