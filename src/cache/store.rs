//! Durable storage for rendered artifacts.
//!
//! One file per cache key under a single directory. The file's modification
//! time is the only freshness signal; entries past the TTL read as stale and
//! are replaced by the next successful render, never deleted.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::Clock;
use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to prepare cache directory: {0}")]
    Prepare(io::Error),
    #[error("failed to read cache entry: {0}")]
    Read(io::Error),
    #[error("failed to write cache entry: {0}")]
    Write(io::Error),
    #[error("cache task did not complete: {0}")]
    Task(String),
}

/// A cached artifact with the instant it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub bytes: Bytes,
    pub stored_at: SystemTime,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale { age: Duration },
    Absent,
}

impl Lookup {
    pub fn into_fresh(self) -> Option<CacheEntry> {
        match self {
            Lookup::Fresh(entry) => Some(entry),
            Lookup::Stale { .. } | Lookup::Absent => None,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up `key`. Read failures are reported as [`Lookup::Absent`].
    async fn get(&self, key: &CacheKey) -> Lookup;

    /// Store `bytes` under `key`, replacing any previous entry atomically.
    async fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError>;
}

/// `true` while an entry stored at `stored_at` is still servable at `now`.
///
/// Timestamps ahead of `now` count as age zero.
pub fn is_fresh(stored_at: SystemTime, now: SystemTime, ttl: Duration) -> bool {
    entry_age(stored_at, now) <= ttl
}

fn entry_age(stored_at: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(stored_at).unwrap_or(Duration::ZERO)
}

/// Filesystem-backed [`CacheStore`].
#[derive(Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl DiskCacheStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            ttl,
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    async fn lookup(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        let path = self.path_for(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Lookup::Absent),
            Err(err) => return Err(CacheError::Read(err)),
        };
        let stored_at = metadata.modified().map_err(CacheError::Read)?;
        let now = self.clock.now();
        if !is_fresh(stored_at, now, self.ttl) {
            return Ok(Lookup::Stale {
                age: entry_age(stored_at, now),
            });
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Lookup::Absent),
            Err(err) => return Err(CacheError::Read(err)),
        };
        if bytes.is_empty() {
            return Ok(Lookup::Absent);
        }

        Ok(Lookup::Fresh(CacheEntry {
            key: key.clone(),
            bytes: Bytes::from(bytes),
            stored_at,
        }))
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn get(&self, key: &CacheKey) -> Lookup {
        let started_at = Instant::now();
        match self.lookup(key).await {
            Ok(Lookup::Fresh(entry)) => {
                debug!(
                    target = "cache::store",
                    op = "cache::get",
                    result = "hit",
                    key = %key,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    bytes = entry.bytes.len(),
                    "Cache entry served"
                );
                Lookup::Fresh(entry)
            }
            Ok(Lookup::Stale { age }) => {
                debug!(
                    target = "cache::store",
                    op = "cache::get",
                    result = "stale",
                    key = %key,
                    age_secs = age.as_secs(),
                    ttl_secs = self.ttl.as_secs(),
                    "Cache entry expired"
                );
                Lookup::Stale { age }
            }
            Ok(Lookup::Absent) => {
                debug!(
                    target = "cache::store",
                    op = "cache::get",
                    result = "miss",
                    key = %key,
                    "Cache entry absent"
                );
                Lookup::Absent
            }
            Err(err) => {
                warn!(
                    target = "cache::store",
                    op = "cache::get",
                    result = "read_error",
                    key = %key,
                    cache_path = %self.path_for(key).display(),
                    error = %err,
                    "Failed to read cache entry; treating as miss"
                );
                Lookup::Absent
            }
        }
    }

    async fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        let root = self.root.clone();
        let target = self.path_for(key);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomically(&root, &target, &bytes))
            .await
            .map_err(|err| CacheError::Task(err.to_string()))?
    }
}

/// Write through a temporary file in `root`, then rename over `target`.
fn write_atomically(root: &Path, target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    fs::create_dir_all(root).map_err(CacheError::Prepare)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".docprint-")
        .suffix(".partial")
        .tempfile_in(root)
        .map_err(CacheError::Write)?;
    staged.write_all(bytes).map_err(CacheError::Write)?;
    staged.as_file().sync_all().map_err(CacheError::Write)?;
    staged
        .persist(target)
        .map_err(|err| CacheError::Write(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{ManualClock, SystemClock};
    use crate::domain::document::{DocumentId, Variant};
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(15 * 60);

    fn key(raw: &str, variant: Variant) -> CacheKey {
        CacheKey::derive(&DocumentId::parse(raw).expect("valid id"), variant)
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let stored = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        assert!(is_fresh(stored, stored, TTL));
        assert!(is_fresh(stored, stored + TTL, TTL));
        assert!(!is_fresh(stored, stored + TTL + Duration::from_secs(1), TTL));
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        assert!(is_fresh(now + Duration::from_secs(60), now, TTL));
    }

    #[tokio::test]
    async fn missing_directory_reads_as_absent() {
        let dir = TempDir::new().expect("temp dir");
        let store = DiskCacheStore::new(dir.path().join("never"), TTL, Arc::new(SystemClock));
        let lookup = store.get(&key("abc123", Variant::default())).await;
        assert!(matches!(lookup, Lookup::Absent));
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let dir = TempDir::new().expect("temp dir");
        let store = DiskCacheStore::new(dir.path().join("print"), TTL, Arc::new(SystemClock));
        let key = key("abc123", Variant::default());

        store.put(&key, b"%PDF-1.5 body").await.expect("put");
        let entry = store.get(&key).await.into_fresh().expect("fresh entry");

        assert_eq!(entry.key, key);
        assert_eq!(entry.bytes.as_ref(), b"%PDF-1.5 body");
        assert!(dir.path().join("print").join("abc123.pdf").is_file());
    }

    #[tokio::test]
    async fn put_overwrites_and_leaves_no_partial_files() {
        let dir = TempDir::new().expect("temp dir");
        let store = DiskCacheStore::new(dir.path(), TTL, Arc::new(SystemClock));
        let key = key("abc123", Variant::new(true, false));

        store.put(&key, b"first").await.expect("first put");
        store.put(&key, b"second").await.expect("second put");

        let entry = store.get(&key).await.into_fresh().expect("fresh entry");
        assert_eq!(entry.bytes.as_ref(), b"second");

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["abc123-dark.pdf".to_string()]);
    }

    #[tokio::test]
    async fn entries_past_ttl_read_as_stale() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new());
        let store = DiskCacheStore::new(dir.path(), TTL, clock.clone());
        let key = key("abc123", Variant::default());

        store.put(&key, b"%PDF-1.5").await.expect("put");
        assert!(matches!(store.get(&key).await, Lookup::Fresh(_)));

        clock.advance(TTL + Duration::from_secs(60));
        match store.get(&key).await {
            Lookup::Stale { age } => assert!(age > TTL),
            other => panic!("expected stale entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_reads_as_absent() {
        let dir = TempDir::new().expect("temp dir");
        let store = DiskCacheStore::new(dir.path(), TTL, Arc::new(SystemClock));
        let key = key("abc123", Variant::default());
        fs::write(store.path_for(&key), b"").expect("write empty");

        assert!(matches!(store.get(&key).await, Lookup::Absent));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn put_reports_unwritable_directory() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("write blocker");
        let store = DiskCacheStore::new(blocker.join("print"), TTL, Arc::new(SystemClock));

        let err = store
            .put(&key("abc123", Variant::default()), b"%PDF-1.5")
            .await
            .expect_err("directory cannot be created");
        assert!(matches!(err, CacheError::Prepare(_)), "unexpected: {err:?}");
    }
}
