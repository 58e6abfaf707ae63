pub mod config;
pub mod error;
pub mod file;
pub mod memory;
mod record;
mod tip;

pub use config::{open_store, StoreConfig};
pub use error::EngineError;
pub use file::FileStore;
pub use memory::MemoryStore;
