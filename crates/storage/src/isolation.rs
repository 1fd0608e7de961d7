use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{DEFAULT_BUSY_TIMEOUT_MS, init_connection};

/// Isolation state of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// No transaction wrapping: every statement commits on its own. For
    /// administrative statements only.
    Autocommit,
    /// Deferred transactions over a WAL journal. A transaction reads from
    /// the snapshot taken at its first read and never blocks the writer;
    /// the guarded update protocol supplies the lost-update protection.
    Snapshot,
}

/// A connection plus its isolation state.
pub struct Session {
    conn: Connection,
    mode: IsolationMode,
}

impl Session {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    pub fn open_with_timeout(path: &str, busy_timeout_ms: u64) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, busy_timeout_ms)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT_MS)
    }

    fn from_connection(conn: Connection, busy_timeout_ms: u64) -> Result<Self, StorageError> {
        init_connection(&conn, busy_timeout_ms)?;
        Ok(Self {
            conn,
            mode: IsolationMode::Snapshot,
        })
    }

    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Switches between autocommit and snapshot mode. Must be called between
    /// transactions; setting the current mode again is a no-op.
    pub fn set_autocommit(&mut self, enabled: bool) -> Result<(), StorageError> {
        if !self.conn.is_autocommit() {
            return Err(StorageError::TransactionActive);
        }
        let mode = if enabled {
            IsolationMode::Autocommit
        } else {
            IsolationMode::Snapshot
        };
        debug!(target: "optilock::isolation", ?mode, "isolation mode set");
        self.mode = mode;
        Ok(())
    }

    /// Opens a deferred transaction. Refused in autocommit mode.
    pub fn begin(&mut self) -> Result<Transaction<'_>, StorageError> {
        if self.mode == IsolationMode::Autocommit {
            return Err(StorageError::Autocommit);
        }
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?)
    }

    /// The raw connection, for administrative statements.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
