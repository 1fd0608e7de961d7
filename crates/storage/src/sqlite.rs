use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, params_from_iter};
use tracing::trace;

use optilock_core::{FieldValue, Interval, RecordId, Shift, Translate, Version};

use crate::error::StorageError;
use crate::schema::{CollectionSchema, MAX_PARAMS, quote};
use crate::traits::{Assignment, HierarchyTable, NodeLink, RecordTable, Sibling};

pub fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::Integer(*n),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
        FieldValue::Reference(id) => Value::Integer(id.get()),
        FieldValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

fn version_value(version: Option<Version>) -> Value {
    version.map_or(Value::Null, |v| Value::Blob(v.to_bytes().to_vec()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// One collection's table, seen through an open transaction. Cannot be built
/// from a bare connection, so every statement it issues belongs to the
/// caller's transaction.
pub struct SqliteTable<'a> {
    conn: &'a Connection,
    schema: &'a CollectionSchema,
}

impl<'a> SqliteTable<'a> {
    pub fn new(tx: &'a Transaction<'_>, schema: &'a CollectionSchema) -> Self {
        Self { conn: tx, schema }
    }

    fn table(&self) -> String {
        quote(&self.schema.table)
    }

    fn id_col(&self) -> String {
        quote(&self.schema.id_column)
    }

    fn version_col(&self) -> Result<String, StorageError> {
        self.schema
            .version_column
            .as_deref()
            .map(quote)
            .ok_or_else(|| {
                StorageError::InvalidSchema(format!("{} has no version column", self.schema.name))
            })
    }

    fn bound_cols(&self) -> Result<(String, String, String), StorageError> {
        let h = self.schema.hierarchy()?;
        Ok((
            quote(&h.parent_column),
            quote(&h.left_column),
            quote(&h.right_column),
        ))
    }

    fn order_clause(&self) -> Result<String, StorageError> {
        let h = self.schema.hierarchy()?;
        let mut cols: Vec<String> = h.order.iter().map(|c| quote(c)).collect();
        cols.push(self.id_col());
        Ok(cols.join(", "))
    }

    fn set_clause(assignments: &[Assignment], params: &mut Vec<Value>) -> Vec<String> {
        assignments
            .iter()
            .map(|(column, value)| {
                params.push(to_sql_value(value));
                format!("{} = ?", quote(column))
            })
            .collect()
    }

    fn parent_clause(&self, parent: Option<RecordId>, params: &mut Vec<Value>) -> Result<String, StorageError> {
        let (parent_col, _, _) = self.bound_cols()?;
        Ok(match parent {
            Some(id) => {
                params.push(Value::Integer(id.get()));
                format!("{parent_col} = ?")
            }
            None => format!("{parent_col} IS NULL"),
        })
    }
}

impl RecordTable for SqliteTable<'_> {
    fn schema(&self) -> &CollectionSchema {
        self.schema
    }

    fn existing_ids(&mut self, ids: &[RecordId]) -> Result<Vec<RecordId>, StorageError> {
        let sql = format!(
            "SELECT {id} FROM {t} WHERE {id} IN ({p})",
            id = self.id_col(),
            t = self.table(),
            p = placeholders(ids.len()),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| id.get())), |row| {
            row.get::<_, i64>(0)
        })?;
        let mut result = Vec::with_capacity(ids.len());
        for row in rows {
            result.push(RecordId::new(row?));
        }
        Ok(result)
    }

    fn read_versions(
        &mut self,
        ids: &[RecordId],
    ) -> Result<Vec<(RecordId, Option<Version>)>, StorageError> {
        let sql = format!(
            "SELECT {id}, {ver} FROM {t} WHERE {id} IN ({p})",
            id = self.id_col(),
            ver = self.version_col()?,
            t = self.table(),
            p = placeholders(ids.len()),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| id.get())), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
        })?;

        let mut result = Vec::with_capacity(ids.len());
        for row in rows {
            let (id, bytes) = row.map_err(StorageError::from_write)?;
            let version = bytes.as_deref().map(Version::from_slice).transpose()?;
            result.push((RecordId::new(id), version));
        }
        Ok(result)
    }

    fn update_ids(
        &mut self,
        assignments: &[Assignment],
        ids: &[RecordId],
    ) -> Result<usize, StorageError> {
        let mut params = Vec::with_capacity(assignments.len() + ids.len());
        let sets = Self::set_clause(assignments, &mut params);
        params.extend(ids.iter().map(|id| Value::Integer(id.get())));
        let sql = format!(
            "UPDATE {t} SET {sets} WHERE {id} IN ({p})",
            t = self.table(),
            sets = sets.join(", "),
            id = self.id_col(),
            p = placeholders(ids.len()),
        );
        trace!(target: "optilock::sql", %sql);
        self.conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(StorageError::from_write)
    }

    fn update_versioned(
        &mut self,
        assignments: &[Assignment],
        guards: &[(RecordId, Option<Version>)],
        stamp: Version,
    ) -> Result<Vec<RecordId>, StorageError> {
        let ver = self.version_col()?;
        let id = self.id_col();
        let mut params = Vec::with_capacity(assignments.len() + 1 + guards.len() * 2);
        let mut sets = Self::set_clause(assignments, &mut params);
        sets.push(format!("{ver} = ?"));
        params.push(version_value(Some(stamp)));

        let mut predicates = Vec::with_capacity(guards.len());
        for (record, version) in guards {
            params.push(Value::Integer(record.get()));
            params.push(version_value(*version));
            predicates.push(format!("({id} = ? AND {ver} IS ?)"));
        }
        let sql = format!(
            "UPDATE {t} SET {sets} WHERE {preds} RETURNING {id}",
            t = self.table(),
            sets = sets.join(", "),
            preds = predicates.join(" OR "),
        );
        trace!(target: "optilock::sql", %sql);

        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from_write)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))
            .map_err(StorageError::from_write)?;
        let mut written = Vec::with_capacity(guards.len());
        for row in rows {
            written.push(RecordId::new(row.map_err(StorageError::from_write)?));
        }
        Ok(written)
    }
}

impl HierarchyTable for SqliteTable<'_> {
    fn bounds(&mut self, id: RecordId) -> Result<Interval, StorageError> {
        let (_, left, right) = self.bound_cols()?;
        let sql = format!(
            "SELECT {left}, {right} FROM {t} WHERE {idc} = ?1",
            t = self.table(),
            idc = self.id_col(),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map([id.get()], |row| {
            Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?))
        })?;
        match rows.next() {
            Some(Ok((Some(l), Some(r)))) => Ok(Interval::new(l, r)?),
            Some(Ok(_)) => Err(StorageError::Unpositioned(id)),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Err(StorageError::NotFound(format!("{}/{id}", self.schema.name))),
        }
    }

    fn siblings(&mut self, parent: Option<RecordId>) -> Result<Vec<Sibling>, StorageError> {
        let (_, _, right) = self.bound_cols()?;
        let mut params = Vec::new();
        let clause = self.parent_clause(parent, &mut params)?;
        let sql = format!(
            "SELECT {idc}, {right} FROM {t} WHERE {clause} ORDER BY {order}",
            idc = self.id_col(),
            t = self.table(),
            order = self.order_clause()?,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok(Sibling {
                id: RecordId::new(row.get(0)?),
                right: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn shift(&mut self, shift: &Shift) -> Result<usize, StorageError> {
        let (_, left, right) = self.bound_cols()?;
        let t = self.table();
        let mut touched = 0;
        for col in [left, right] {
            let sql = format!("UPDATE {t} SET {col} = {col} + ?1 WHERE ?2 <= {col}");
            touched += self
                .conn
                .execute(&sql, [shift.width, shift.from])
                .map_err(StorageError::from_write)?;
        }
        Ok(touched)
    }

    fn translate(&mut self, translate: &Translate) -> Result<usize, StorageError> {
        let (_, left, right) = self.bound_cols()?;
        let sql = format!(
            "UPDATE {t} SET {left} = {left} + ?1, {right} = {right} + ?1 WHERE ?2 <= {left} AND {left} < ?3",
            t = self.table(),
        );
        self.conn
            .execute(&sql, [translate.delta, translate.start, translate.end])
            .map_err(StorageError::from_write)
    }

    fn parent_differs(
        &mut self,
        ids: &[RecordId],
        new_parent: Option<RecordId>,
    ) -> Result<Vec<RecordId>, StorageError> {
        let (parent_col, _, _) = self.bound_cols()?;
        let mut changed = Vec::new();
        for chunk in ids.chunks(MAX_PARAMS - 1) {
            let sql = format!(
                "SELECT {idc} FROM {t} WHERE {idc} IN ({p}) AND {parent_col} IS NOT ?",
                idc = self.id_col(),
                t = self.table(),
                p = placeholders(chunk.len()),
            );
            let mut params: Vec<Value> = chunk.iter().map(|id| Value::Integer(id.get())).collect();
            params.push(new_parent.map_or(Value::Null, |p| Value::Integer(p.get())));
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;
            for row in rows {
                changed.push(RecordId::new(row?));
            }
        }
        Ok(changed)
    }

    fn links(&mut self) -> Result<Vec<NodeLink>, StorageError> {
        let (parent_col, _, _) = self.bound_cols()?;
        let sql = format!(
            "SELECT {idc}, {parent_col} FROM {t} ORDER BY {order}",
            idc = self.id_col(),
            t = self.table(),
            order = self.order_clause()?,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(NodeLink {
                id: RecordId::new(row.get(0)?),
                parent: row.get::<_, Option<i64>>(1)?.map(RecordId::new),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn set_bounds(&mut self, id: RecordId, bounds: Interval) -> Result<(), StorageError> {
        let (_, left, right) = self.bound_cols()?;
        let sql = format!(
            "UPDATE {t} SET {left} = ?1, {right} = ?2 WHERE {idc} = ?3",
            t = self.table(),
            idc = self.id_col(),
        );
        let n = self
            .conn
            .execute(&sql, [bounds.left, bounds.right, id.get()])
            .map_err(StorageError::from_write)?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("{}/{id}", self.schema.name)));
        }
        Ok(())
    }
}
