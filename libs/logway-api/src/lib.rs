pub mod entry;
pub mod error;
pub mod store;

pub use entry::{Entry, Offset, Timestamp};
pub use error::{ErrorKind, StoreError};
pub use store::LogStore;
