pub mod db;
pub mod fixtures;

pub use db::{TestDb, init_tracing};
pub use fixtures::*;
