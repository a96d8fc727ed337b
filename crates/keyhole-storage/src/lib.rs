//! Storage backends for the Keyhole URL shortener.
//!
//! Every backend implements [`KeyValueStore`] with the same semantics:
//! [`MemoryStore`] keeps records in a map, [`FileStore`] mirrors that map to a
//! JSON file, and [`PgStore`] keeps them in PostgreSQL.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileStore;
pub use keyhole_core::error::{Result, StorageError};
pub use keyhole_core::{KeyValueStore, ScanFilter, StoreOutcome};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Memory,
    File(PathBuf),
    Postgres(String),
}

impl BackendConfig {
    /// Picks a backend the way the service is configured: a database DSN
    /// wins over a file path, and neither means memory. Empty values count as
    /// absent.
    pub fn select(file_path: Option<PathBuf>, database_dsn: Option<String>) -> Self {
        if let Some(dsn) = database_dsn.filter(|dsn| !dsn.is_empty()) {
            return BackendConfig::Postgres(dsn);
        }
        match file_path.filter(|path| !path.as_os_str().is_empty()) {
            Some(path) => BackendConfig::File(path),
            None => BackendConfig::Memory,
        }
    }
}

impl Display for BackendConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendConfig::Memory => write!(f, "memory"),
            BackendConfig::File(path) => write!(f, "file({})", path.display()),
            BackendConfig::Postgres(_) => write!(f, "postgres"),
        }
    }
}

/// Opens the configured backend.
pub async fn open(config: &BackendConfig) -> Result<Arc<dyn KeyValueStore>> {
    info!(backend = %config, "opening storage backend");
    let store: Arc<dyn KeyValueStore> = match config {
        BackendConfig::Memory => Arc::new(MemoryStore::new()),
        BackendConfig::File(path) => {
            let path = path.clone();
            let store = tokio::task::spawn_blocking(move || FileStore::open(path))
                .await
                .map_err(|e| StorageError::Io(format!("open task failed: {e}")))??;
            Arc::new(store)
        }
        BackendConfig::Postgres(dsn) => Arc::new(PgStore::connect(dsn).await?),
    };
    Ok(store)
}
