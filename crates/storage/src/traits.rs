use optilock_core::{FieldValue, Interval, RecordId, Shift, Translate, Version};

use crate::error::StorageError;
use crate::schema::CollectionSchema;

/// One `column = value` pair of an update.
pub type Assignment = (String, FieldValue);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sibling {
    pub id: RecordId,
    /// `None` while the node has not been positioned yet.
    pub right: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLink {
    pub id: RecordId,
    pub parent: Option<RecordId>,
}

/// Row access needed by the guarded update path. Implementations run every
/// call inside the caller's transaction.
pub trait RecordTable {
    fn schema(&self) -> &CollectionSchema;

    /// The subset of `ids` that exist.
    fn existing_ids(&mut self, ids: &[RecordId]) -> Result<Vec<RecordId>, StorageError>;

    /// Current version marker of each existing id. Missing ids are simply
    /// absent from the result.
    fn read_versions(
        &mut self,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, Option<Version>)>, StorageError>;

    /// Plain update matched on identity only. Returns the affected row count.
    fn update_ids(
        &mut self,
        assignments: &[Assignment],
        ids: &[RecordId],
    ) -> Result<usize, StorageError>;

    /// Compare-and-swap update: a row is written only if its version still
    /// equals the guard, and its version becomes `stamp`. Returns the ids
    /// actually written.
    fn update_versioned(
        &mut self,
        assignments: &[Assignment],
        guards: &[(RecordId, Option<Version>)],
        stamp: Version,
    ) -> Result<Vec<RecordId>, StorageError>;
}

/// Nested-set access needed by the rebalancer.
pub trait HierarchyTable: RecordTable {
    fn bounds(&mut self, id: RecordId) -> Result<Interval, StorageError>;

    /// Children of `parent` (roots for `None`) in sibling order.
    fn siblings(&mut self, parent: Option<RecordId>) -> Result<Vec<Sibling>, StorageError>;

    fn shift(&mut self, shift: &Shift) -> Result<usize, StorageError>;

    fn translate(&mut self, translate: &Translate) -> Result<usize, StorageError>;

    /// The subset of `ids` whose parent is not `new_parent`.
    fn parent_differs(
        &mut self,
        ids: &[RecordId],
        new_parent: Option<RecordId>,
    ) -> Result<Vec<RecordId>, StorageError>;

    /// Every node of the collection in sibling order.
    fn links(&mut self) -> Result<Vec<NodeLink>, StorageError>;

    fn set_bounds(&mut self, id: RecordId, bounds: Interval) -> Result<(), StorageError>;
}
