use std::collections::{BTreeMap, HashMap};

use optilock_core::{FieldValue, RecordId, Version};
use optilock_engine::{EngineConfig, EngineError};
use optilock_storage::{CollectionSchema, FieldKind};
use rusqlite::{Connection, OptionalExtension, params};

pub const CATEGORY: &str = "category";
pub const PARTNER: &str = "partner";
pub const TAG: &str = "tag";

const DDL: &str = "
    CREATE TABLE product_category (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES product_category(id),
        parent_left INTEGER,
        parent_right INTEGER,
        write_date BLOB
    );
    CREATE TABLE res_partner (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        write_date BLOB
    );
    CREATE TABLE tag (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
";

/// Versioned and hierarchical, ordered by name.
pub fn category_schema() -> CollectionSchema {
    CollectionSchema::new(CATEGORY, "product_category")
        .with_version("write_date")
        .with_field("name", FieldKind::Column)
        .with_field("child_ids", FieldKind::Delegated)
        .with_field("complete_name", FieldKind::Computed)
        .with_hierarchy("parent_id", &["name"])
}

pub fn partner_schema() -> CollectionSchema {
    CollectionSchema::new(PARTNER, "res_partner")
        .with_version("write_date")
        .with_field("name", FieldKind::Column)
        .with_field("email", FieldKind::Column)
}

/// No version column: writes are never guarded.
pub fn tag_schema() -> CollectionSchema {
    CollectionSchema::new(TAG, "tag").with_field("name", FieldKind::Column)
}

pub fn fixture_config() -> Result<EngineConfig, EngineError> {
    EngineConfig::default()
        .with_collection(category_schema())?
        .with_collection(partner_schema())?
        .with_collection(tag_schema())
}

pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)
}

/// Inserts an unpositioned category; positions come from a rebuild or a move.
pub fn insert_category(
    conn: &Connection,
    id: i64,
    name: &str,
    parent: Option<i64>,
) -> rusqlite::Result<RecordId> {
    conn.execute(
        "INSERT INTO product_category (id, name, parent_id) VALUES (?1, ?2, ?3)",
        params![id, name, parent],
    )?;
    Ok(RecordId::new(id))
}

pub fn insert_partner(conn: &Connection, id: i64, name: &str) -> rusqlite::Result<RecordId> {
    conn.execute(
        "INSERT INTO res_partner (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    Ok(RecordId::new(id))
}

pub fn insert_tag(conn: &Connection, id: i64, name: &str) -> rusqlite::Result<RecordId> {
    conn.execute("INSERT INTO tag (id, name) VALUES (?1, ?2)", params![id, name])?;
    Ok(RecordId::new(id))
}

pub fn values(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn text_of(conn: &Connection, table: &str, id: i64, column: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        &format!("SELECT {column} FROM {table} WHERE id = ?1"),
        [id],
        |row| row.get(0),
    )
}

pub fn version_of(
    conn: &Connection,
    table: &str,
    id: i64,
) -> Result<Option<Version>, Box<dyn std::error::Error>> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            &format!("SELECT write_date FROM {table} WHERE id = ?1"),
            [id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(bytes.as_deref().map(Version::from_slice).transpose()?)
}

/// (left, right) of every category.
pub fn fetch_intervals(conn: &Connection) -> rusqlite::Result<BTreeMap<i64, (i64, i64)>> {
    let mut stmt = conn.prepare("SELECT id, parent_left, parent_right FROM product_category")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            (
                row.get::<_, Option<i64>>(1)?.unwrap_or(-1),
                row.get::<_, Option<i64>>(2)?.unwrap_or(-1),
            ),
        ))
    })?;
    rows.collect()
}

/// Checks the nested-set invariants over (id, parent, left, right) rows:
/// every interval is well formed, two intervals are either disjoint or
/// nested, and nesting matches ancestry exactly.
pub fn check_nested_set(nodes: &[(i64, Option<i64>, i64, i64)]) -> Result<(), String> {
    let parents: HashMap<i64, Option<i64>> = nodes.iter().map(|n| (n.0, n.1)).collect();
    let is_ancestor = |ancestor: i64, mut node: i64| {
        for _ in 0..nodes.len() {
            match parents.get(&node).copied().flatten() {
                Some(p) if p == ancestor => return true,
                Some(p) => node = p,
                None => return false,
            }
        }
        false
    };

    for &(id, _, left, right) in nodes {
        if left < 0 || left >= right {
            return Err(format!("node {id} has bad interval ({left}, {right})"));
        }
    }
    for &(a, _, al, ar) in nodes {
        for &(b, _, bl, br) in nodes {
            if a == b {
                continue;
            }
            let encloses = al < bl && br < ar;
            let disjoint = ar < bl || br < al;
            let reversed = bl < al && ar < br;
            if !(encloses || disjoint || reversed) {
                return Err(format!("nodes {a} ({al}, {ar}) and {b} ({bl}, {br}) overlap"));
            }
            if encloses != is_ancestor(a, b) {
                return Err(format!("nesting of {b} inside {a} does not match the parent links"));
            }
        }
    }
    Ok(())
}

/// Loads every category and runs [`check_nested_set`] on it.
pub fn check_categories(conn: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    let mut stmt = conn.prepare("SELECT id, parent_id, parent_left, parent_right FROM product_category")?;
    let nodes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?.unwrap_or(-1),
                row.get::<_, Option<i64>>(3)?.unwrap_or(-1),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    check_nested_set(&nodes)?;
    Ok(())
}
