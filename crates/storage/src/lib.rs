pub mod error;
pub mod isolation;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use isolation::{IsolationMode, Session};
pub use memory::{MemoryRow, MemoryTable};
pub use schema::{CollectionSchema, FieldClass, FieldKind, HierarchySpec, Registry};
pub use sqlite::SqliteTable;
pub use traits::*;
