use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use optilock_core::{FieldValue, Interval, RecordId, Shift, Translate, Version};

use crate::error::StorageError;
use crate::schema::CollectionSchema;
use crate::traits::{Assignment, HierarchyTable, NodeLink, RecordTable, Sibling};

#[derive(Debug, Clone, Default)]
pub struct MemoryRow {
    pub values: BTreeMap<String, FieldValue>,
    pub version: Option<Version>,
    pub left: Option<i64>,
    pub right: Option<i64>,
}

/// In-memory stand-in for one collection's table. Executes the same
/// statements as `SqliteTable` with the same matching rules, and can inject
/// a concurrent writer between a version read and the guarded write.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    schema: CollectionSchema,
    rows: BTreeMap<RecordId, MemoryRow>,
    interfere: BTreeSet<RecordId>,
    statements: usize,
}

impl MemoryTable {
    pub fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            interfere: BTreeSet::new(),
            statements: 0,
        }
    }

    pub fn insert(&mut self, id: RecordId, values: impl IntoIterator<Item = (String, FieldValue)>) {
        let row = self.rows.entry(id).or_default();
        row.values.extend(values);
    }

    pub fn remove(&mut self, id: RecordId) -> Option<MemoryRow> {
        self.rows.remove(&id)
    }

    pub fn row(&self, id: RecordId) -> Option<&MemoryRow> {
        self.rows.get(&id)
    }

    pub fn value(&self, id: RecordId, field: &str) -> Option<&FieldValue> {
        self.rows.get(&id).and_then(|r| r.values.get(field))
    }

    pub fn version(&self, id: RecordId) -> Option<Version> {
        self.rows.get(&id).and_then(|r| r.version)
    }

    pub fn set_version(&mut self, id: RecordId, version: Option<Version>) {
        if let Some(row) = self.rows.get_mut(&id) {
            row.version = version;
        }
    }

    pub fn interval(&self, id: RecordId) -> Option<Interval> {
        let row = self.rows.get(&id)?;
        Some(Interval {
            left: row.left?,
            right: row.right?,
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.rows.keys().copied()
    }

    /// The next version read that includes `id` is followed by a simulated
    /// commit from another writer, advancing the row's version.
    pub fn interfere_after_read(&mut self, id: RecordId) {
        self.interfere.insert(id);
    }

    /// Number of statements executed so far.
    pub fn statements(&self) -> usize {
        self.statements
    }

    fn parent_of(&self, row: &MemoryRow) -> Option<RecordId> {
        let column = self.schema.hierarchy.as_ref()?.parent_column.as_str();
        row.values.get(column).and_then(|v| v.as_reference()).flatten()
    }

    fn sort_key_cmp(&self, a: (&RecordId, &MemoryRow), b: (&RecordId, &MemoryRow)) -> Ordering {
        let order = self
            .schema
            .hierarchy
            .as_ref()
            .map(|h| h.order.as_slice())
            .unwrap_or_default();
        for column in order {
            let ord = if column == &self.schema.id_column {
                a.0.cmp(b.0)
            } else {
                let null = FieldValue::Null;
                let x = a.1.values.get(column).unwrap_or(&null);
                let y = b.1.values.get(column).unwrap_or(&null);
                x.order_cmp(y)
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.0.cmp(b.0)
    }

    fn sorted(&self) -> Vec<(&RecordId, &MemoryRow)> {
        let mut rows: Vec<_> = self.rows.iter().collect();
        rows.sort_by(|a, b| self.sort_key_cmp(*a, *b));
        rows
    }

    fn assign(row: &mut MemoryRow, assignments: &[Assignment]) {
        for (column, value) in assignments {
            row.values.insert(column.clone(), value.clone());
        }
    }
}

impl RecordTable for MemoryTable {
    fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    fn existing_ids(&mut self, ids: &[RecordId]) -> Result<Vec<RecordId>, StorageError> {
        self.statements += 1;
        Ok(ids.iter().copied().filter(|id| self.rows.contains_key(id)).collect())
    }

    fn read_versions(
        &mut self,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, Option<Version>)>, StorageError> {
        self.statements += 1;
        let found: Vec<_> = ids
            .iter()
            .filter_map(|id| self.rows.get(id).map(|r| (*id, r.version)))
            .collect();
        for (id, version) in &found {
            if self.interfere.remove(id) {
                let bumped = match version {
                    Some(v) => Version::new(v.wall_ms(), v.counter() + 1),
                    None => Version::new(0, 1),
                };
                self.set_version(*id, Some(bumped));
            }
        }
        Ok(found)
    }

    fn update_ids(
        &mut self,
        assignments: &[Assignment],
        ids: &[RecordId],
    ) -> Result<usize, StorageError> {
        self.statements += 1;
        let mut n = 0;
        for id in ids {
            if let Some(row) = self.rows.get_mut(id) {
                Self::assign(row, assignments);
                n += 1;
            }
        }
        Ok(n)
    }

    fn update_versioned(
        &mut self,
        assignments: &[Assignment],
        guards: &[(RecordId, Option<Version>)],
        stamp: Version,
    ) -> Result<Vec<RecordId>, StorageError> {
        self.statements += 1;
        let mut written = Vec::new();
        for (id, expected) in guards {
            if let Some(row) = self.rows.get_mut(id) {
                if row.version == *expected {
                    Self::assign(row, assignments);
                    row.version = Some(stamp);
                    written.push(*id);
                }
            }
        }
        Ok(written)
    }
}

impl HierarchyTable for MemoryTable {
    fn bounds(&mut self, id: RecordId) -> Result<Interval, StorageError> {
        self.statements += 1;
        let row = self
            .rows
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{id}", self.schema.name)))?;
        match (row.left, row.right) {
            (Some(l), Some(r)) => Ok(Interval::new(l, r)?),
            _ => Err(StorageError::Unpositioned(id)),
        }
    }

    fn siblings(&mut self, parent: Option<RecordId>) -> Result<Vec<Sibling>, StorageError> {
        self.schema.hierarchy()?;
        self.statements += 1;
        Ok(self
            .sorted()
            .into_iter()
            .filter(|(_, row)| self.parent_of(row) == parent)
            .map(|(id, row)| Sibling {
                id: *id,
                right: row.right,
            })
            .collect())
    }

    fn shift(&mut self, shift: &Shift) -> Result<usize, StorageError> {
        self.statements += 2;
        let mut touched = 0;
        for row in self.rows.values_mut() {
            for bound in [&mut row.left, &mut row.right].into_iter().flatten() {
                if *bound >= shift.from {
                    *bound = shift.apply(*bound);
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    fn translate(&mut self, translate: &Translate) -> Result<usize, StorageError> {
        self.statements += 1;
        let mut touched = 0;
        for row in self.rows.values_mut() {
            if let Some(left) = row.left.filter(|l| translate.selects(*l)) {
                row.left = Some(left + translate.delta);
                row.right = row.right.map(|r| r + translate.delta);
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn parent_differs(
        &mut self,
        ids: &[RecordId],
        new_parent: Option<RecordId>,
    ) -> Result<Vec<RecordId>, StorageError> {
        self.schema.hierarchy()?;
        self.statements += 1;
        Ok(ids
            .iter()
            .filter(|id| {
                self.rows
                    .get(*id)
                    .is_some_and(|row| self.parent_of(row) != new_parent)
            })
            .copied()
            .collect())
    }

    fn links(&mut self) -> Result<Vec<NodeLink>, StorageError> {
        self.schema.hierarchy()?;
        self.statements += 1;
        Ok(self
            .sorted()
            .into_iter()
            .map(|(id, row)| NodeLink {
                id: *id,
                parent: self.parent_of(row),
            })
            .collect())
    }

    fn set_bounds(&mut self, id: RecordId, bounds: Interval) -> Result<(), StorageError> {
        self.statements += 1;
        let row = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{id}", self.schema.name)))?;
        row.left = Some(bounds.left);
        row.right = Some(bounds.right);
        Ok(())
    }
}
