use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::sync::watch;

use logway_api::{Entry, LogStore, Offset, StoreError};

use crate::record::{decode_line, encode_line};
use crate::tip::{wait_for_tip, Tip};

// ════════════════════════════════════════════════════════════════
//  FileTopic
// ════════════════════════════════════════════════════════════════

struct FileState {
    /// Opened lazily on the first append; waits and reads never create the file.
    writer: Option<File>,
    /// Byte position of each line. Index = offset.
    positions: Vec<u64>,
    /// Byte length of the valid part of the file.
    end: u64,
    /// The file may hold bytes past `end` that a failed rollback left behind.
    stale: bool,
}

/// One topic = one append-only JSON-lines file.
struct FileTopic {
    path: PathBuf,
    state: Mutex<FileState>,
    tip: Tip,
}

impl FileTopic {
    fn open(path: PathBuf) -> Result<Self, StoreError> {
        let (positions, end) = if path.exists() {
            scan(&path)?
        } else {
            (Vec::new(), 0)
        };
        let tip = Tip::new(positions.len() as Offset);
        Ok(Self {
            path,
            state: Mutex::new(FileState {
                writer: None,
                positions,
                end,
                stale: false,
            }),
            tip,
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(path = %self.path.display(), "file topic lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn append(&self, entry: &Entry, fsync: bool) -> Result<Offset, StoreError> {
        let line = encode_line(entry)?;

        let mut state = self.lock();
        if state.stale {
            self.reindex(&mut state)?;
        }

        if let Err(e) = self.write_line(&mut state, &line, fsync) {
            self.rollback(&mut state);
            return Err(e);
        }

        let offset = state.positions.len() as Offset;
        let start = state.end;
        state.positions.push(start);
        state.end += line.len() as u64;
        self.tip.advance(offset + 1);
        Ok(offset)
    }

    fn write_line(&self, state: &mut FileState, line: &[u8], fsync: bool) -> Result<(), StoreError> {
        let file = match state.writer.take() {
            Some(f) => f,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| StoreError::io(format!("open {}: {e}", self.path.display())))?,
        };
        let file = state.writer.insert(file);

        file.write_all(line)
            .map_err(|e| StoreError::io(format!("write {}: {e}", self.path.display())))?;
        if fsync {
            file.sync_data()
                .map_err(|e| StoreError::io(format!("fsync {}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    /// Cut the file back to the indexed length after a failed append.
    ///
    /// When that fails too, the index is marked stale and rebuilt from disk
    /// before the next append.
    fn rollback(&self, state: &mut FileState) {
        state.writer = None;
        let truncated = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_len(state.end));
        match truncated {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && state.end == 0 => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "rollback after failed append");
                state.stale = true;
            }
        }
    }

    fn reindex(&self, state: &mut FileState) -> Result<(), StoreError> {
        let (positions, end) = if self.path.exists() {
            scan(&self.path)?
        } else {
            (Vec::new(), 0)
        };
        tracing::warn!(
            path = %self.path.display(),
            before = state.positions.len(),
            after = positions.len(),
            "rebuilt topic index"
        );
        state.positions = positions;
        state.end = end;
        state.stale = false;
        self.tip.advance(state.positions.len() as Offset);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.lock().positions.is_empty()
    }

    fn read(&self, offset: Offset) -> Result<Option<Entry>, StoreError> {
        let (start, len) = {
            let state = self.lock();
            let Some(index) = usize::try_from(offset).ok() else {
                return Ok(None);
            };
            let Some(&start) = state.positions.get(index) else {
                return Ok(None);
            };
            let stop = state.positions.get(index + 1).copied().unwrap_or(state.end);
            (start, stop - start)
        };

        let mut f = File::open(&self.path)
            .map_err(|e| StoreError::io(format!("open {}: {e}", self.path.display())))?;
        f.seek(SeekFrom::Start(start))
            .map_err(|e| StoreError::io(format!("seek: {e}")))?;
        let mut buf = vec![0u8; len as usize];
        f.read_exact(&mut buf)
            .map_err(|e| StoreError::io(format!("read {}: {e}", self.path.display())))?;

        decode_line(&buf)
            .map(Some)
            .map_err(|e| e.with_context(format!("offset {offset}")))
    }
}

/// Build the line index of an existing topic file.
///
/// A trailing line without `\n` is a torn write and gets truncated away.
fn scan(path: &Path) -> Result<(Vec<u64>, u64), StoreError> {
    let f = File::open(path)
        .map_err(|e| StoreError::io(format!("open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(f);

    let mut positions = Vec::new();
    let mut pos = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| StoreError::io(format!("read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            tracing::warn!(path = %path.display(), at = pos, bytes = n, "truncating torn trailing record");
            OpenOptions::new()
                .write(true)
                .open(path)
                .and_then(|f| f.set_len(pos))
                .map_err(|e| StoreError::io(format!("truncate {}: {e}", path.display())))?;
            break;
        }
        positions.push(pos);
        pos += n as u64;
    }

    tracing::debug!(path = %path.display(), entries = positions.len(), "indexed topic file");
    Ok((positions, pos))
}

// ════════════════════════════════════════════════════════════════
//  FileStore
// ════════════════════════════════════════════════════════════════

/// Durable log store: `{data_dir}/{topic-id}.log`, one JSON line per entry.
///
/// `topic-id` is the URL-safe base64 of the topic name, so any name maps to a
/// single file inside `data_dir`.
pub struct FileStore {
    data_dir: PathBuf,
    fsync: bool,
    topics: RwLock<HashMap<String, Arc<FileTopic>>>,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub fn open(data_dir: impl Into<PathBuf>, fsync: bool) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| StoreError::config(format!("data dir {}: {e}", data_dir.display())))?;
        Ok(Self {
            data_dir,
            fsync,
            topics: RwLock::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn topic_path(&self, topic: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.log", URL_SAFE_NO_PAD.encode(topic.as_bytes())))
    }

    /// Run `f` on a topic under the map lock, indexing its file on first
    /// access.
    ///
    /// With `register = false` an unknown topic without a file stays unknown.
    fn with_topic<R>(
        &self,
        topic: &str,
        register: bool,
        f: impl FnOnce(&Arc<FileTopic>) -> Result<R, StoreError>,
    ) -> Result<Option<R>, StoreError> {
        {
            let guard = self.read_topics();
            if let Some(t) = guard.get(topic) {
                return f(t).map(Some);
            }
        }

        let mut guard = self.write_topics();
        if let Some(t) = guard.get(topic) {
            return f(t).map(Some);
        }

        let path = self.topic_path(topic);
        if !register && !path.exists() {
            return Ok(None);
        }
        let opened = Arc::new(
            FileTopic::open(path).map_err(|e| e.with_context(format!("topic '{topic}'")))?,
        );
        let out = f(&opened)?;
        guard.insert(topic.to_string(), opened);
        Ok(Some(out))
    }

    fn release(&self, topic: &str, t: &Arc<FileTopic>) {
        let mut guard = self.write_topics();
        // The releasing waiter's own receiver is still alive here.
        let idle = guard.get(topic).is_some_and(|current| {
            Arc::ptr_eq(current, t) && current.tip.waiters() <= 1 && current.is_empty()
        });
        if idle {
            guard.remove(topic);
            tracing::trace!(topic, "dropped idle topic after poll");
        }
    }

    fn read_topics(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<FileTopic>>> {
        match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("file store topic map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<FileTopic>>> {
        match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("file store topic map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// A pending poll; forgets its topic on drop if the topic is still empty
/// and unwatched.
struct Waiter<'a> {
    store: &'a FileStore,
    topic: String,
    t: Arc<FileTopic>,
    rx: watch::Receiver<Offset>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.store.release(&self.topic, &self.t);
    }
}

impl LogStore for FileStore {
    fn append(
        &self,
        topic: &str,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Offset, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            // Under the map lock, so a finishing poll cannot drop the topic mid-append.
            self.with_topic(&topic, true, |t| t.append(&entry, self.fsync))?
                .ok_or_else(|| StoreError::logic(format!("topic '{topic}' could not be opened")))
        })
    }

    fn read_at(
        &self,
        topic: &str,
        offset: Offset,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            match self.with_topic(&topic, false, |t| Ok(t.clone()))? {
                Some(t) => t.read(offset),
                None => Ok(None),
            }
        })
    }

    fn wait_for_next(
        &self,
        topic: &str,
        offset: Offset,
        max_wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let Some((t, rx)) =
                self.with_topic(&topic, true, |t| Ok((t.clone(), t.tip.subscribe())))?
            else {
                return Ok(None);
            };
            let mut waiter = Waiter {
                store: self,
                topic,
                t,
                rx,
            };
            if wait_for_tip(&mut waiter.rx, offset, max_wait).await {
                waiter.t.read(offset)
            } else {
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::DateTime;

    use super::*;

    fn entry(key: &[u8], value: &[u8]) -> Entry {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456789+02:00").unwrap();
        Entry::new(key, value, ts)
    }

    #[tokio::test]
    async fn append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();

        assert_eq!(store.append("t", entry(b"hello", b"world")).await.unwrap(), 0);
        assert_eq!(store.append("t", entry(b"\x00\xff", b"")).await.unwrap(), 1);

        assert_eq!(store.read_at("t", 0).await.unwrap(), Some(entry(b"hello", b"world")));
        assert_eq!(store.read_at("t", 1).await.unwrap(), Some(entry(b"\x00\xff", b"")));
        assert_eq!(store.read_at("t", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_topic_reads_none_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();

        assert_eq!(store.read_at("ghost", 0).await.unwrap(), None);
        assert_eq!(store.wait_for_next("ghost", 0, Duration::ZERO).await.unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), true).unwrap();
            store.append("orders", entry(b"a", b"1")).await.unwrap();
            store.append("orders", entry(b"b", b"2")).await.unwrap();
        }

        let store = FileStore::open(dir.path(), true).unwrap();
        assert_eq!(store.read_at("orders", 1).await.unwrap(), Some(entry(b"b", b"2")));
        assert_eq!(store.append("orders", entry(b"c", b"3")).await.unwrap(), 2);
        assert_eq!(store.read_at("orders", 2).await.unwrap(), Some(entry(b"c", b"3")));
    }

    #[tokio::test]
    async fn torn_tail_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let store = FileStore::open(dir.path(), false).unwrap();
            store.append("t", entry(b"k", b"v")).await.unwrap();
            store.topic_path("t")
        };
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"key":"aGVs"#).unwrap();
        drop(f);

        let store = FileStore::open(dir.path(), false).unwrap();
        assert_eq!(store.read_at("t", 1).await.unwrap(), None);
        assert_eq!(store.append("t", entry(b"k2", b"v2")).await.unwrap(), 1);
        assert_eq!(store.read_at("t", 1).await.unwrap(), Some(entry(b"k2", b"v2")));
    }

    #[tokio::test]
    async fn topic_names_stay_inside_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data"), false).unwrap();

        store.append("../escape/../../x", entry(b"k", b"v")).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(store.data_dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();
        std::fs::write(store.topic_path("bad"), b"not json\n").unwrap();

        let err = store.read_at("bad", 0).await.unwrap_err();
        assert_eq!(err.kind(), logway_api::ErrorKind::Format);
    }

    #[tokio::test]
    async fn wait_wakes_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), false).unwrap());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.append("t", entry(b"k", b"v")).await.unwrap();
        });

        let started = Instant::now();
        let got = store.wait_for_next("t", 0, Duration::from_secs(10)).await.unwrap();
        assert_eq!(got, Some(entry(b"k", b"v")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn polls_on_empty_topics_leave_no_topics_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();

        for i in 0..100 {
            let topic = format!("ghost-{i}");
            assert_eq!(store.wait_for_next(&topic, 0, Duration::ZERO).await.unwrap(), None);
        }
        assert_eq!(store.wait_for_next("brief", 0, Duration::from_millis(10)).await.unwrap(), None);
        assert!(store.read_topics().is_empty());

        store.append("real", entry(b"k", b"v")).await.unwrap();
        assert_eq!(store.wait_for_next("real", 3, Duration::ZERO).await.unwrap(), None);
        assert_eq!(store.read_topics().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();
        assert_eq!(store.append("t", entry(b"a", b"0")).await.unwrap(), 0);

        let t = store.with_topic("t", false, |t| Ok(t.clone())).unwrap().unwrap();
        // Half a line on disk, then a writer that cannot write.
        let mut f = OpenOptions::new().append(true).open(&t.path).unwrap();
        f.write_all(br#"{"key":"aGVs"#).unwrap();
        drop(f);
        t.lock().writer = Some(File::open(&t.path).unwrap());

        let err = store.append("t", entry(b"b", b"lost")).await.unwrap_err();
        assert_eq!(err.kind(), logway_api::ErrorKind::Io);

        assert_eq!(store.append("t", entry(b"c", b"1")).await.unwrap(), 1);
        assert_eq!(store.read_at("t", 1).await.unwrap(), Some(entry(b"c", b"1")));
        assert_eq!(store.read_at("t", 2).await.unwrap(), None);

        let reopened = FileStore::open(dir.path(), false).unwrap();
        assert_eq!(reopened.read_at("t", 1).await.unwrap(), Some(entry(b"c", b"1")));
        assert_eq!(reopened.read_at("t", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_index_is_rebuilt_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();
        assert_eq!(store.append("t", entry(b"a", b"0")).await.unwrap(), 0);

        // A line the index never learned about, as left by a failed rollback.
        let t = store.with_topic("t", false, |t| Ok(t.clone())).unwrap().unwrap();
        let mut f = OpenOptions::new().append(true).open(&t.path).unwrap();
        f.write_all(&encode_line(&entry(b"o", b"orphan")).unwrap()).unwrap();
        drop(f);
        t.lock().stale = true;

        assert_eq!(store.append("t", entry(b"n", b"next")).await.unwrap(), 2);
        assert_eq!(store.read_at("t", 1).await.unwrap(), Some(entry(b"o", b"orphan")));
        assert_eq!(store.read_at("t", 2).await.unwrap(), Some(entry(b"n", b"next")));
    }

    #[tokio::test]
    async fn poisoned_topic_map_still_serves() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), false).unwrap());
        store.append("t", entry(b"k", b"v")).await.unwrap();

        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.write_topics();
            panic!("poison the topic map");
        })
        .join();
        assert!(store.topics.is_poisoned());

        assert_eq!(store.read_at("t", 0).await.unwrap(), Some(entry(b"k", b"v")));
        assert_eq!(store.append("t", entry(b"k", b"w")).await.unwrap(), 1);
    }
}
