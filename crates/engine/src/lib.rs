pub mod config;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod rebalance;
pub mod retry;

pub use config::EngineConfig;
pub use error::{ConflictReport, EngineError, SERIALIZATION_FAILURE};
pub use guard::{UpdateBatch, apply_guarded};
pub use hooks::{NoHooks, WriteHooks};
pub use rebalance::{rebalance, rebuild};
pub use retry::{RetryConfig, with_retry};

use std::collections::{BTreeMap, HashMap};

use optilock_core::{CoreError, FieldValue, RecordId, VersionClock, WriteId, dedup_ids};
use optilock_storage::{FieldClass, HierarchyTable, Session, SqliteTable};
use rusqlite::Transaction;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Leave nested-set bounds stale; the caller runs a rebuild later.
    pub defer_hierarchy: bool,
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub write_id: WriteId,
    /// Rows written by the guarded update.
    pub applied: usize,
    /// Records whose parent changed, in the order they were repositioned.
    pub moved: Vec<RecordId>,
    /// True if `moved` is non-empty but repositioning was skipped.
    pub hierarchy_deferred: bool,
}

/// Write orchestrator: routes each field to the guarded update or to the
/// hooks, and repositions records whose parent changed. Holds no record
/// state; every call works inside the transaction it is given.
pub struct Engine {
    config: EngineConfig,
    clock: VersionClock,
    hooks: Box<dyn WriteHooks>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: VersionClock::new(),
            hooks: Box::new(NoHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn WriteHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a session in the configured isolation mode.
    pub fn open_session(&self, path: &str) -> Result<Session, EngineError> {
        let mut session = Session::open_with_timeout(path, self.config.busy_timeout_ms)?;
        if self.config.autocommit {
            session.set_autocommit(true)?;
        }
        Ok(session)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Writes `values` to every record in `ids` of a registered collection.
    pub fn write_in(
        &mut self,
        tx: &Transaction<'_>,
        collection: &str,
        ids: &[RecordId],
        values: BTreeMap<String, FieldValue>,
        options: WriteOptions,
    ) -> Result<WriteOutcome, EngineError> {
        let Engine { config, clock, hooks } = self;
        let schema = config.collection(collection)?;
        let mut table = SqliteTable::new(tx, schema);
        orchestrate(&mut table, clock, hooks.as_mut(), config.chunk_size, ids, values, options)
    }

    /// Same as [`Engine::write_in`], against any table implementation.
    pub fn write<T: HierarchyTable>(
        &mut self,
        table: &mut T,
        ids: &[RecordId],
        values: BTreeMap<String, FieldValue>,
        options: WriteOptions,
    ) -> Result<WriteOutcome, EngineError> {
        let chunk_size = self.config.chunk_size;
        orchestrate(table, &mut self.clock, self.hooks.as_mut(), chunk_size, ids, values, options)
    }

    /// Recomputes every interval of a registered collection.
    pub fn rebuild_hierarchy_in(
        &mut self,
        tx: &Transaction<'_>,
        collection: &str,
    ) -> Result<usize, EngineError> {
        let schema = self.config.collection(collection)?;
        let mut table = SqliteTable::new(tx, schema);
        rebuild(&mut table)
    }
}

fn orchestrate<T: HierarchyTable>(
    table: &mut T,
    clock: &mut VersionClock,
    hooks: &mut dyn WriteHooks,
    chunk_size: usize,
    ids: &[RecordId],
    values: BTreeMap<String, FieldValue>,
    options: WriteOptions,
) -> Result<WriteOutcome, EngineError> {
    let write_id = WriteId::new();
    let schema = table.schema().clone();
    let collection = schema.name.clone();
    let versioned = schema.is_versioned();
    let parent_column = schema.hierarchy.as_ref().map(|h| h.parent_column.clone());

    let ids = dedup_ids(ids.iter().copied());
    if ids.is_empty() {
        return Err(EngineError::EmptyBatch(collection));
    }
    let fields: Vec<String> = values.keys().cloned().collect();
    hooks.check_write(&collection, &ids, &fields)?;

    let mut columns = BTreeMap::new();
    let mut delegated = Vec::new();
    let mut inverse = Vec::new();
    for (field, value) in values {
        match schema.classify(&field) {
            FieldClass::Column | FieldClass::Managed => {
                columns.insert(field, value);
            }
            FieldClass::Delegated => delegated.push((field, value)),
            FieldClass::Computed => inverse.push((field, value)),
            FieldClass::Unknown => {
                warn!(target: "optilock::write", %collection, %field, "no such field, skipped");
            }
        }
    }

    // Which records actually change parent must be known before the write.
    let new_parent = match parent_column.as_ref().and_then(|col| columns.get(col)) {
        Some(value) => Some(value.as_reference().ok_or_else(|| {
            CoreError::InvalidData(format!("{collection}: parent must be a reference, got {value:?}"))
        })?),
        None => None,
    };
    let changing = match new_parent {
        Some(parent) => table.parent_differs(&ids, parent)?,
        None => Vec::new(),
    };

    let mut direct: Vec<String> = columns
        .keys()
        .filter(|f| schema.classify(f) == FieldClass::Column)
        .cloned()
        .collect();
    direct.extend(schema.version_column.clone());

    let batch = UpdateBatch::new(ids.iter().copied(), columns).with_write_id(write_id);
    let applied = apply_guarded(table, batch, versioned, clock, chunk_size)?;
    hooks.modified(&collection, &ids, &direct);

    for (field, value) in &delegated {
        hooks.write_delegated(&collection, &ids, field, value)?;
    }
    for (field, value) in &inverse {
        hooks.write_inverse(&collection, &ids, field, value)?;
    }
    let indirect: Vec<String> = delegated
        .iter()
        .chain(inverse.iter())
        .map(|(f, _)| f.clone())
        .collect();
    if !indirect.is_empty() {
        hooks.modified(&collection, &ids, &indirect);
    }

    let mut moved = changing;
    let mut hierarchy_deferred = false;
    if let (Some(parent), false) = (new_parent, moved.is_empty()) {
        if options.defer_hierarchy {
            debug!(target: "optilock::write", %collection, nodes = moved.len(), "hierarchy update deferred");
            hierarchy_deferred = true;
        } else {
            let position: HashMap<RecordId, usize> = table
                .siblings(parent)?
                .iter()
                .enumerate()
                .map(|(i, s)| (s.id, i))
                .collect();
            moved.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            rebalance(table, parent, &moved)?;
        }
    }

    hooks.recompute(&collection, &ids)?;
    debug!(target: "optilock::write", %write_id, %collection, applied, moved = moved.len(), "write complete");
    Ok(WriteOutcome {
        write_id,
        applied,
        moved,
        hierarchy_deferred,
    })
}
