//! Version-stamped updates.
//!
//! A versioned collection is written with a compare-and-swap per row: the
//! current version markers are read inside the caller's transaction, and the
//! update only matches rows whose marker is still the one that was read. Any
//! shortfall in the returned ids means another writer committed in between.
//!
//! Batches are split into chunks bounded by the store's parameter limit.
//! Each chunk is one statement. Chunks are not atomic as a group: when chunk
//! *k* fails, chunks before it stay applied in the caller's transaction, and
//! only rolling that transaction back undoes them.

use std::collections::BTreeMap;

use optilock_core::{FieldValue, RecordId, VersionClock, WriteId, dedup_ids};
use optilock_storage::{Assignment, FieldClass, RecordTable, schema::MAX_PARAMS};
use tracing::{debug, warn};

use crate::error::{ConflictReport, EngineError};

/// Ids plus the values to give every one of them. Consumed by
/// [`apply_guarded`].
#[derive(Debug, Clone)]
pub struct UpdateBatch {
    write_id: WriteId,
    ids: Vec<RecordId>,
    values: BTreeMap<String, FieldValue>,
}

impl UpdateBatch {
    pub fn new(
        ids: impl IntoIterator<Item = RecordId>,
        values: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            write_id: WriteId::new(),
            ids: dedup_ids(ids),
            values,
        }
    }

    pub fn with_write_id(mut self, write_id: WriteId) -> Self {
        self.write_id = write_id;
        self
    }

    pub fn write_id(&self) -> WriteId {
        self.write_id
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }
}

/// Largest chunk that keeps one guarded statement within the parameter
/// limit: one slot per assignment, one for the new version, two per id.
pub fn effective_chunk_size(configured: usize, assignments: usize) -> usize {
    let by_params = MAX_PARAMS.saturating_sub(assignments + 1) / 2;
    configured.min(by_params).max(1)
}

/// Turns batch values into column assignments. Engine-managed columns are
/// dropped; anything that is not a column is refused.
fn column_assignments<T: RecordTable>(
    table: &T,
    values: &BTreeMap<String, FieldValue>,
) -> Result<Vec<Assignment>, EngineError> {
    let schema = table.schema();
    let mut assignments = Vec::with_capacity(values.len());
    for (field, value) in values {
        match schema.classify(field) {
            FieldClass::Column => assignments.push((field.clone(), value.clone())),
            FieldClass::Managed => {
                warn!(target: "optilock::guard", collection = %schema.name, %field, "ignoring write to engine-managed column");
            }
            FieldClass::Computed | FieldClass::Delegated | FieldClass::Unknown => {
                return Err(EngineError::FieldRejected {
                    collection: schema.name.clone(),
                    field: field.clone(),
                });
            }
        }
    }
    Ok(assignments)
}

/// Applies `batch` to `table`. With `versioned`, each row is guarded by the
/// version marker read in the same transaction and receives a fresh stamp
/// from `clock`. Returns the number of rows written.
pub fn apply_guarded<T: RecordTable>(
    table: &mut T,
    batch: UpdateBatch,
    versioned: bool,
    clock: &mut VersionClock,
    chunk_size: usize,
) -> Result<usize, EngineError> {
    let collection = table.schema().name.clone();
    if batch.ids.is_empty() {
        return Err(EngineError::EmptyBatch(collection));
    }
    let assignments = column_assignments(table, &batch.values)?;
    if !versioned && assignments.is_empty() {
        debug!(target: "optilock::guard", %collection, "nothing to write");
        return Ok(0);
    }

    let chunk = effective_chunk_size(chunk_size, assignments.len());
    let mut applied = 0;
    for (n, sub_ids) in batch.ids.chunks(chunk).enumerate() {
        applied += if versioned {
            write_versioned_chunk(table, &batch, &assignments, sub_ids, clock)?
        } else {
            write_plain_chunk(table, &assignments, sub_ids)?
        };
        debug!(
            target: "optilock::guard",
            write_id = %batch.write_id,
            %collection,
            chunk = n,
            rows = sub_ids.len(),
            versioned,
            "chunk applied"
        );
    }
    Ok(applied)
}

fn missing(requested: &[RecordId], found: impl IntoIterator<Item = RecordId>) -> Vec<RecordId> {
    let found: std::collections::HashSet<RecordId> = found.into_iter().collect();
    requested.iter().copied().filter(|id| !found.contains(id)).collect()
}

fn write_plain_chunk<T: RecordTable>(
    table: &mut T,
    assignments: &[Assignment],
    sub_ids: &[RecordId],
) -> Result<usize, EngineError> {
    let n = table.update_ids(assignments, sub_ids)?;
    if n != sub_ids.len() {
        let existing = table.existing_ids(sub_ids)?;
        return Err(EngineError::NotFound {
            collection: table.schema().name.clone(),
            ids: missing(sub_ids, existing),
        });
    }
    Ok(n)
}

fn write_versioned_chunk<T: RecordTable>(
    table: &mut T,
    batch: &UpdateBatch,
    assignments: &[Assignment],
    sub_ids: &[RecordId],
    clock: &mut VersionClock,
) -> Result<usize, EngineError> {
    let collection = table.schema().name.clone();
    let guards = table.read_versions(sub_ids)?;
    if guards.len() != sub_ids.len() {
        return Err(EngineError::NotFound {
            ids: missing(sub_ids, guards.iter().map(|(id, _)| *id)),
            collection,
        });
    }

    let newest = guards.iter().filter_map(|(_, v)| *v).max();
    let stamp = clock.stamp_after(newest)?;
    let written = table.update_versioned(assignments, &guards, stamp)?;
    if written.len() < sub_ids.len() {
        let report = ConflictReport {
            write_id: batch.write_id,
            collection,
            ids: missing(sub_ids, written),
            attempted: batch.values.clone(),
        };
        warn!(target: "optilock::guard", %report, "optimistic lock lost");
        return Err(EngineError::Conflict(Box::new(report)));
    }
    Ok(written.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optilock_core::Version;
    use optilock_storage::{CollectionSchema, FieldKind, MemoryTable};

    fn schema(versioned: bool) -> CollectionSchema {
        let schema = CollectionSchema::new("partner", "res_partner")
            .with_field("name", FieldKind::Column)
            .with_field("tags", FieldKind::Delegated);
        if versioned {
            schema.with_version("write_date")
        } else {
            schema
        }
    }

    fn table(versioned: bool, n: i64) -> MemoryTable {
        let mut table = MemoryTable::new(schema(versioned));
        for id in 1..=n {
            table.insert(RecordId::new(id), [("name".to_string(), FieldValue::from("x"))]);
        }
        table
    }

    fn name(value: &str) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([("name".to_string(), FieldValue::from(value))])
    }

    fn ids(raw: &[i64]) -> Vec<RecordId> {
        raw.iter().copied().map(RecordId::new).collect()
    }

    #[test]
    fn versioned_write_stamps_every_row() {
        let mut table = table(true, 3);
        let mut clock = VersionClock::new();
        let batch = UpdateBatch::new(ids(&[1, 2, 3, 2]), name("y"));
        let n = apply_guarded(&mut table, batch, true, &mut clock, 1000).unwrap();
        assert_eq!(n, 3);
        for id in ids(&[1, 2, 3]) {
            assert_eq!(table.value(id, "name"), Some(&FieldValue::from("y")));
            assert!(table.version(id).is_some());
        }
    }

    #[test]
    fn caller_supplied_version_is_ignored() {
        let mut table = table(true, 1);
        let mut clock = VersionClock::new();
        let id = RecordId::new(1);
        let prior = Version::new(u64::MAX >> 1, 0);
        table.set_version(id, Some(prior));

        let mut values = name("y");
        values.insert("write_date".into(), FieldValue::Bytes(vec![0; 12]));
        apply_guarded(&mut table, UpdateBatch::new([id], values), true, &mut clock, 10).unwrap();

        let after = table.version(id).unwrap();
        assert!(after > prior, "expected {after:?} > {prior:?}");
        assert_eq!(table.value(id, "write_date"), None);
    }

    #[test]
    fn missing_ids_are_not_found() {
        let mut table = table(true, 2);
        let mut clock = VersionClock::new();
        let batch = UpdateBatch::new(ids(&[1, 2, 7]), name("y"));
        match apply_guarded(&mut table, batch, true, &mut clock, 1000) {
            Err(EngineError::NotFound { collection, ids: missing }) => {
                assert_eq!(collection, "partner");
                assert_eq!(missing, ids(&[7]));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        // Nothing was written: the version read failed before any update.
        assert_eq!(table.value(RecordId::new(1), "name"), Some(&FieldValue::from("x")));
    }

    #[test]
    fn unversioned_missing_ids_are_not_found() {
        let mut table = table(false, 2);
        let mut clock = VersionClock::new();
        let batch = UpdateBatch::new(ids(&[1, 9]), name("y"));
        let err = apply_guarded(&mut table, batch, false, &mut clock, 1000).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { ref ids, .. } if ids == &[RecordId::new(9)]));
        assert!(!err.is_retryable());
    }

    #[test]
    fn concurrent_bump_is_a_conflict() {
        let mut table = table(true, 3);
        let mut clock = VersionClock::new();
        table.interfere_after_read(RecordId::new(2));
        let batch = UpdateBatch::new(ids(&[1, 2, 3]), name("y"));
        let write_id = batch.write_id();
        let err = apply_guarded(&mut table, batch, true, &mut clock, 1000).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.sqlstate(), Some("40001"));
        match err {
            EngineError::Conflict(report) => {
                assert_eq!(report.write_id, write_id);
                assert_eq!(report.ids, ids(&[2]));
                assert_eq!(report.attempted, name("y"));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn earlier_chunks_stay_applied_after_a_conflict() {
        let mut table = table(true, 4);
        let mut clock = VersionClock::new();
        table.interfere_after_read(RecordId::new(3));
        let batch = UpdateBatch::new(ids(&[1, 2, 3, 4]), name("y"));
        let err = apply_guarded(&mut table, batch, true, &mut clock, 2).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        assert_eq!(table.value(RecordId::new(1), "name"), Some(&FieldValue::from("y")));
        assert_eq!(table.value(RecordId::new(2), "name"), Some(&FieldValue::from("y")));
        assert_eq!(table.value(RecordId::new(3), "name"), Some(&FieldValue::from("x")));
    }

    #[test]
    fn delegated_field_is_rejected_before_any_statement() {
        let mut table = table(true, 1);
        let mut clock = VersionClock::new();
        let mut values = name("y");
        values.insert("tags".into(), FieldValue::Null);
        let err = apply_guarded(&mut table, UpdateBatch::new(ids(&[1]), values), true, &mut clock, 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::FieldRejected { ref field, .. } if field == "tags"));
        assert_eq!(table.statements(), 0);
    }

    #[test]
    fn empty_batch_is_refused() {
        let mut table = table(false, 1);
        let mut clock = VersionClock::new();
        let err = apply_guarded(&mut table, UpdateBatch::new([], name("y")), false, &mut clock, 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyBatch(_)));
    }

    #[test]
    fn chunk_size_respects_parameter_limit() {
        assert_eq!(effective_chunk_size(1000, 5), 1000);
        assert_eq!(effective_chunk_size(100_000, 0), (MAX_PARAMS - 1) / 2);
        assert_eq!(effective_chunk_size(100_000, MAX_PARAMS), 1);
    }
}
