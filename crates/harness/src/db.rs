use std::sync::Once;

use optilock_engine::{Engine, EngineConfig, EngineError};
use optilock_storage::Session;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{create_tables, fixture_config};

static TRACING: Once = Once::new();

/// Routes engine logs to the test output. `RUST_LOG` overrides the default
/// `optilock=debug` filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("optilock=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A database file in a temporary directory with the fixture tables created.
/// Several sessions can be opened on it to play concurrent callers.
pub struct TestDb {
    _dir: TempDir,
    path: String,
    config: EngineConfig,
}

impl TestDb {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_config(fixture_config()?)
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let path = dir
            .path()
            .join("optilock.db")
            .to_str()
            .ok_or("temp path is not UTF-8")?
            .to_string();
        let db = Self {
            _dir: dir,
            path,
            config,
        };
        create_tables(db.session()?.conn())?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A new engine over the same configuration; one per simulated caller.
    pub fn engine(&self) -> Engine {
        Engine::new(self.config.clone())
    }

    pub fn session(&self) -> Result<Session, EngineError> {
        self.engine().open_session(&self.path)
    }
}
