use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::entry::{Entry, Offset};
use crate::error::StoreError;

/// Capability interface of the log store.
///
/// The gateway sees the store only through this trait. Implementations must
/// be safe for concurrent use: one instance is shared by all requests.
///
/// Offsets are assigned by the store and strictly increase within a topic.
/// An entry, once appended, stays readable at its offset.
pub trait LogStore: Send + Sync {
    /// Append an entry to `topic`, creating the topic on first use.
    /// Returns the offset assigned to the entry.
    fn append(
        &self,
        topic: &str,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Offset, StoreError>> + Send + '_>>;

    /// Non-blocking lookup. `None` = no entry at this offset (yet).
    fn read_at(
        &self,
        topic: &str,
        offset: Offset,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>>;

    /// Wait at most `max_wait` for the entry at `offset` to become available.
    ///
    /// Returns as soon as the entry exists. `None` after `max_wait` means
    /// "nothing yet" and is not an error. A zero `max_wait` never suspends.
    fn wait_for_next(
        &self,
        topic: &str,
        offset: Offset,
        max_wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>>;
}
