use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use logway_api::LogStore;

use crate::error::EngineError;
use crate::file::FileStore;
use crate::memory::MemoryStore;

/// Which engine backs the gateway.
///
/// ```toml
/// [storage]
/// kind = "file"
/// data_dir = "./data"
/// fsync = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile, lost on restart.
    #[default]
    Memory,
    /// Append-only files, one per topic.
    File {
        data_dir: PathBuf,
        /// `fdatasync` after every append.
        #[serde(default)]
        fsync: bool,
    },
}

/// Build the single store instance shared by all requests.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn LogStore>, EngineError> {
    match config {
        StoreConfig::Memory => {
            tracing::info!("using in-memory log store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::File { data_dir, fsync } => {
            if data_dir.as_os_str().is_empty() {
                return Err(EngineError::Config("storage.data_dir must not be empty".into()));
            }
            let store = FileStore::open(data_dir.clone(), *fsync)?;
            tracing::info!(data_dir = %data_dir.display(), fsync, "using file log store");
            Ok(Arc::new(store))
        }
    }
}
