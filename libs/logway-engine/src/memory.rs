use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;

use logway_api::{Entry, LogStore, Offset, StoreError};

use crate::tip::{wait_for_tip, Tip};

// ═══════════════════════════════════════════════════════════════
//  TopicLog
// ═══════════════════════════════════════════════════════════════

struct TopicLog {
    entries: RwLock<Vec<Entry>>,
    tip: Tip,
}

impl TopicLog {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            tip: Tip::new(0),
        }
    }

    fn append(&self, entry: Entry) -> Offset {
        let mut entries = write_lock(&self.entries);
        let offset = entries.len() as Offset;
        entries.push(entry);
        self.tip.advance(offset + 1);
        offset
    }

    fn get(&self, offset: Offset) -> Option<Entry> {
        let index = usize::try_from(offset).ok()?;
        read_lock(&self.entries).get(index).cloned()
    }

    fn is_empty(&self) -> bool {
        read_lock(&self.entries).is_empty()
    }
}

/// A pending poll on one topic.
///
/// Dropping it (finished or cancelled) forgets the topic again when nothing
/// was ever appended to it and no other poll is waiting.
struct Waiter<'a> {
    store: &'a MemoryStore,
    topic: String,
    log: Arc<TopicLog>,
    rx: watch::Receiver<Offset>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.store.release(&self.topic, &self.log);
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// Volatile log store. Offsets are dense and start at 0 per topic.
///
/// Deterministic and dependency-free, so it doubles as the test store.
#[derive(Default)]
pub struct MemoryStore {
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, topic: &str) -> Option<Arc<TopicLog>> {
        read_lock(&self.topics).get(topic).cloned()
    }

    /// Appends run under the map lock, so `release` never drops a topic
    /// that an append is about to fill.
    fn append_entry(&self, topic: &str, entry: Entry) -> Offset {
        {
            let topics = read_lock(&self.topics);
            if let Some(log) = topics.get(topic) {
                return log.append(entry);
            }
        }
        write_lock(&self.topics)
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new()))
            .append(entry)
    }

    /// Subscribe to `topic`, creating an empty slot if needed. The receiver
    /// is taken under the map lock so `release` always sees it.
    fn watch(&self, topic: &str) -> Waiter<'_> {
        let found = read_lock(&self.topics)
            .get(topic)
            .map(|log| (log.clone(), log.tip.subscribe()));
        let (log, rx) = match found {
            Some(pair) => pair,
            None => {
                let mut topics = write_lock(&self.topics);
                let log = topics
                    .entry(topic.to_string())
                    .or_insert_with(|| Arc::new(TopicLog::new()))
                    .clone();
                let rx = log.tip.subscribe();
                (log, rx)
            }
        };
        Waiter {
            store: self,
            topic: topic.to_string(),
            log,
            rx,
        }
    }

    fn release(&self, topic: &str, log: &Arc<TopicLog>) {
        let mut topics = write_lock(&self.topics);
        // The releasing waiter's own receiver is still alive here.
        let idle = topics.get(topic).is_some_and(|current| {
            Arc::ptr_eq(current, log) && current.tip.waiters() <= 1 && current.is_empty()
        });
        if idle {
            topics.remove(topic);
            tracing::trace!(topic, "dropped idle topic after poll");
        }
    }

    /// Number of topics currently held, including ones with a pending poll.
    pub fn topic_count(&self) -> usize {
        read_lock(&self.topics).len()
    }

    /// Number of entries currently stored in `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.get(topic)
            .map(|log| read_lock(&log.entries).len())
            .unwrap_or(0)
    }
}

impl LogStore for MemoryStore {
    fn append(
        &self,
        topic: &str,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Offset, StoreError>> + Send + '_>> {
        let offset = self.append_entry(topic, entry);
        Box::pin(async move { Ok(offset) })
    }

    fn read_at(
        &self,
        topic: &str,
        offset: Offset,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>> {
        let log = self.get(topic);
        Box::pin(async move { Ok(log.and_then(|log| log.get(offset))) })
    }

    fn wait_for_next(
        &self,
        topic: &str,
        offset: Offset,
        max_wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>> {
        // Register the slot so an append to a brand-new topic still wakes us.
        let mut waiter = self.watch(topic);
        Box::pin(async move {
            if wait_for_tip(&mut waiter.rx, offset, max_wait).await {
                Ok(waiter.log.get(offset))
            } else {
                Ok(None)
            }
        })
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory store read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory store write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::DateTime;

    use super::*;

    fn entry(key: &str, value: &str) -> Entry {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00").unwrap();
        Entry::new(key, value, ts)
    }

    #[tokio::test]
    async fn offsets_are_dense_per_topic() {
        let store = MemoryStore::new();
        assert_eq!(store.append("a", entry("k", "1")).await.unwrap(), 0);
        assert_eq!(store.append("a", entry("k", "2")).await.unwrap(), 1);
        assert_eq!(store.append("b", entry("k", "3")).await.unwrap(), 0);
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 1);
    }

    #[tokio::test]
    async fn read_at_returns_appended_entry() {
        let store = MemoryStore::new();
        store.append("a", entry("hello", "world")).await.unwrap();

        let got = store.read_at("a", 0).await.unwrap();
        assert_eq!(got, Some(entry("hello", "world")));
    }

    #[tokio::test]
    async fn read_at_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.read_at("nope", 0).await.unwrap(), None);

        store.append("a", entry("k", "v")).await.unwrap();
        assert_eq!(store.read_at("a", 1).await.unwrap(), None);
        assert_eq!(store.read_at("a", u64::MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_returns_existing_entry_without_waiting() {
        let store = MemoryStore::new();
        store.append("a", entry("k", "v")).await.unwrap();

        let started = Instant::now();
        let got = store.wait_for_next("a", 0, Duration::from_secs(10)).await.unwrap();
        assert_eq!(got, Some(entry("k", "v")));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_times_out_with_none() {
        let store = MemoryStore::new();
        let started = Instant::now();
        let got = store.wait_for_next("a", 0, Duration::from_millis(50)).await.unwrap();
        assert_eq!(got, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_wakes_on_append_to_new_topic() {
        let store = Arc::new(MemoryStore::new());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.append("fresh", entry("k", "late")).await.unwrap();
        });

        let started = Instant::now();
        let got = store.wait_for_next("fresh", 0, Duration::from_secs(10)).await.unwrap();
        assert_eq!(got, Some(entry("k", "late")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_ignores_appends_before_target_offset() {
        let store = Arc::new(MemoryStore::new());

        let writer = store.clone();
        tokio::spawn(async move {
            writer.append("a", entry("k", "0")).await.unwrap();
        });

        // Offset 1 never arrives.
        let got = store.wait_for_next("a", 1, Duration::from_millis(60)).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn polls_on_empty_topics_leave_no_topics_behind() {
        let store = MemoryStore::new();
        for i in 0..100 {
            let topic = format!("ghost-{i}");
            assert_eq!(store.wait_for_next(&topic, 0, Duration::ZERO).await.unwrap(), None);
        }
        assert_eq!(store.wait_for_next("brief", 0, Duration::from_millis(10)).await.unwrap(), None);
        assert_eq!(store.topic_count(), 0);

        store.append("real", entry("k", "v")).await.unwrap();
        assert_eq!(store.wait_for_next("real", 5, Duration::ZERO).await.unwrap(), None);
        assert_eq!(store.topic_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_poll_forgets_topic() {
        let store = MemoryStore::new();
        let pending = store.wait_for_next("gone", 0, Duration::from_secs(10));
        assert_eq!(store.topic_count(), 1);
        drop(pending);
        assert_eq!(store.topic_count(), 0);
    }

    #[tokio::test]
    async fn topic_stays_while_another_poll_waits() {
        let store = MemoryStore::new();
        let long = store.wait_for_next("shared", 0, Duration::from_secs(10));

        assert_eq!(store.wait_for_next("shared", 0, Duration::ZERO).await.unwrap(), None);
        assert_eq!(store.topic_count(), 1);

        store.append("shared", entry("k", "v")).await.unwrap();
        assert_eq!(long.await.unwrap(), Some(entry("k", "v")));
        assert_eq!(store.read_at("shared", 0).await.unwrap(), Some(entry("k", "v")));
    }
}
