//! Disk Cache Store
//!
//! Keeps relayed response bodies on local disk, each paired with a small JSON
//! metadata record (`<key>.meta.json`). An entry only exists when both files
//! are present and readable; anything less is a miss.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Suffix of the metadata record stored next to each body file
const META_SUFFIX: &str = ".meta.json";

/// Suffix of in-progress writes; never visible to lookups
const TEMP_SUFFIX: &str = ".tmp";

/// Identifies a cached response by the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a (url, filename) pair.
    ///
    /// Each component is framed before hashing so that no two distinct pairs
    /// feed the same bytes into SHA-1.
    pub fn compute(url: &str, filename: Option<&str>) -> Self {
        let mut hasher = Sha1::new();
        hasher.update((url.len() as u64).to_be_bytes());
        hasher.update(url.as_bytes());
        match filename {
            Some(name) => {
                hasher.update([1u8]);
                hasher.update(name.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response headers persisted alongside a cached body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub content_type: String,
    pub content_disposition: String,
}

/// A fresh cache entry ready to be streamed back
#[derive(Debug)]
pub struct CachedEntry {
    pub meta: EntryMeta,
    /// Open handle on the body file
    pub body: File,
    /// Body size in bytes
    pub size: u64,
}

/// Outcome of one eviction sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Files removed (bodies, metadata records and abandoned temp files)
    pub removed: usize,
    /// Files that could not be inspected or removed
    pub failed: usize,
}

/// On-disk store for relayed responses
pub struct CacheStore {
    /// Directory holding body, metadata and temp files
    cache_dir: PathBuf,
    /// How long a committed entry may be served without refetching
    fresh_for: Duration,
    /// Serializes commits so a body is always paired with its own metadata
    commit_lock: Arc<Mutex<()>>,
}

impl CacheStore {
    /// Open (creating if needed) a store rooted at `cache_dir`
    ///
    /// # Arguments
    /// * `cache_dir` - Directory to store cached files
    /// * `fresh_for` - Freshness TTL applied by [`CacheStore::lookup`]
    pub fn open(cache_dir: PathBuf, fresh_for: Duration) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", cache_dir))?;

        let store = Self {
            cache_dir,
            fresh_for,
            commit_lock: Arc::new(Mutex::new(())),
        };

        // Partial writes from a previous run can never be committed
        store.cleanup();

        info!(
            cache_dir = %store.cache_dir.display(),
            fresh_secs = fresh_for.as_secs(),
            "Cache store initialized"
        );

        Ok(store)
    }

    /// Look up a fresh entry for `key`
    ///
    /// Returns `None` when either file is missing or unreadable, when the
    /// metadata is not valid JSON, or when the body is older than the
    /// freshness TTL. Stale files stay on disk until a sweep removes them.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedEntry> {
        let body = match File::open(self.body_path(key)).await {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!(key = %key, error = %e, "Cache body unreadable");
                }
                return None;
            }
        };

        let stat = body.metadata().await.ok()?;
        let age = stat.modified().ok().map(age_of)?;
        if age >= self.fresh_for {
            debug!(key = %key, age_secs = age.as_secs(), "Cache entry stale");
            return None;
        }

        let raw = fs::read(self.meta_path(key)).await.ok()?;
        let meta: EntryMeta = match serde_json::from_slice(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding malformed cache metadata");
                return None;
            }
        };

        Some(CachedEntry {
            meta,
            body,
            size: stat.len(),
        })
    }

    /// Start writing a new entry for `key`
    ///
    /// Bytes go to a hidden temp file in the cache directory. Nothing becomes
    /// visible until [`CacheWriter::commit`] succeeds; dropping the writer
    /// deletes the temp file.
    pub async fn open_for_write(&self, key: &CacheKey) -> Result<CacheWriter> {
        let (file, temp_path) = self.temp_file()?;

        debug!(key = %key, temp = %temp_path.display(), "Opened cache writer");

        Ok(self.writer(key, file, temp_path))
    }

    fn writer(&self, key: &CacheKey, file: File, temp_path: TempPath) -> CacheWriter {
        CacheWriter {
            key: key.clone(),
            cache_dir: self.cache_dir.clone(),
            commit_lock: Arc::clone(&self.commit_lock),
            file: BufWriter::new(file),
            temp_path,
            written: 0,
        }
    }

    /// A writer whose temp file rejects writes
    #[cfg(test)]
    pub(crate) async fn open_read_only_writer(&self, key: &CacheKey) -> Result<CacheWriter> {
        let (file, temp_path) = self.temp_file()?;
        drop(file);
        let read_only = File::open(&temp_path).await?;
        Ok(self.writer(key, read_only, temp_path))
    }

    /// Remove every entry whose body is older than `max_age`
    ///
    /// The metadata record goes first; if it cannot be removed the body is
    /// kept so the pair can be retried on the next sweep. Metadata without a
    /// body and abandoned temp files past `max_age` are removed as well.
    /// Errors on individual files are counted and the sweep moves on.
    pub async fn evict_expired(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(cache_dir = %self.cache_dir.display(), error = %e, "Cannot read cache directory");
                report.failed += 1;
                return report;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Cache directory listing interrupted");
                    report.failed += 1;
                    break;
                }
            };

            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let modified = match entry.metadata().await {
                Ok(stat) if stat.is_file() => stat.modified(),
                Ok(_) => continue,
                // Raced with another delete
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => Err(e),
            };
            let age = match modified {
                Ok(mtime) => age_of(mtime),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                    report.failed += 1;
                    continue;
                }
            };
            if age <= max_age {
                continue;
            }

            let removed = if let Some(stem) = name.strip_suffix(META_SUFFIX) {
                // Metadata is only evicted here once its body is gone
                match fs::try_exists(self.cache_dir.join(stem)).await {
                    Ok(false) => remove_if_exists(&path).await.map(usize::from),
                    _ => continue,
                }
            } else if name.ends_with(TEMP_SUFFIX) {
                remove_if_exists(&path).await.map(usize::from)
            } else {
                self.remove_pair(name).await
            };

            match removed {
                Ok(count) => {
                    debug!(file = name, age_secs = age.as_secs(), "Evicted cache file");
                    report.removed += count;
                }
                Err(e) => {
                    warn!(file = name, error = %e, "Failed to evict cache file");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Remove a body and its metadata, metadata first
    async fn remove_pair(&self, name: &str) -> std::io::Result<usize> {
        let meta = remove_if_exists(&self.cache_dir.join(format!("{}{}", name, META_SUFFIX))).await?;
        let body = remove_if_exists(&self.cache_dir.join(name)).await?;
        Ok(usize::from(meta) + usize::from(body))
    }

    /// Clean up stale temp files on startup
    pub fn cleanup(&self) {
        if let Ok(read_dir) = std::fs::read_dir(&self.cache_dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if let Some(ext) = path.extension() {
                    if ext == "tmp" {
                        debug!(path = %path.display(), "Removing stale temp file");
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
        }
    }

    fn temp_file(&self) -> Result<(File, TempPath)> {
        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.cache_dir)
            .context("Failed to create temp file for cache")?;
        let (file, path) = tmp.into_parts();
        Ok((File::from_std(file), path))
    }

    fn body_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}{}", key.as_str(), META_SUFFIX))
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Freshness TTL applied to lookups
    pub fn fresh_for(&self) -> Duration {
        self.fresh_for
    }
}

/// Sink for one entry being written
///
/// Holds the body in a temp file until [`CacheWriter::commit`]. Dropping or
/// discarding the writer removes the temp file.
pub struct CacheWriter {
    key: CacheKey,
    cache_dir: PathBuf,
    commit_lock: Arc<Mutex<()>>,
    file: BufWriter<File>,
    temp_path: TempPath,
    written: u64,
}

impl CacheWriter {
    /// Append a chunk of the body
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Make the entry visible: body first, then its metadata
    ///
    /// Any previous metadata for the key is removed before the body is
    /// replaced, so a reader never pairs a new body with a half-written
    /// record. Returns the committed body size.
    pub async fn commit(self, meta: &EntryMeta) -> Result<u64> {
        let CacheWriter {
            key,
            cache_dir,
            commit_lock,
            mut file,
            temp_path,
            written,
        } = self;

        file.flush().await.context("Failed to flush cache body")?;
        file.get_ref()
            .sync_all()
            .await
            .context("Failed to sync cache body")?;
        drop(file);

        let body_path = cache_dir.join(key.as_str());
        let meta_path = cache_dir.join(format!("{}{}", key.as_str(), META_SUFFIX));

        let _commit = commit_lock.lock().await;
        remove_if_exists(&meta_path)
            .await
            .with_context(|| format!("Failed to clear old metadata: {:?}", meta_path))?;
        temp_path
            .persist(&body_path)
            .with_context(|| format!("Failed to persist cache body: {:?}", body_path))?;

        let json = serde_json::to_vec(meta).context("Failed to encode cache metadata")?;
        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&cache_dir)
            .context("Failed to create temp file for metadata")?;
        let (meta_file, meta_tmp) = tmp.into_parts();
        let mut meta_file = File::from_std(meta_file);
        meta_file
            .write_all(&json)
            .await
            .context("Failed to write cache metadata")?;
        meta_file
            .sync_all()
            .await
            .context("Failed to sync cache metadata")?;
        drop(meta_file);
        meta_tmp
            .persist(&meta_path)
            .with_context(|| format!("Failed to persist cache metadata: {:?}", meta_path))?;

        debug!(key = %key, size = written, "Committed cache entry");
        Ok(written)
    }

    /// Drop the partial body without touching any committed entry
    pub fn discard(self) {
        debug!(key = %self.key, written = self.written, "Discarding partial cache write");
    }
}

/// Time elapsed since `mtime`; files stamped in the future count as new
fn age_of(mtime: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(mtime)
        .unwrap_or(Duration::ZERO)
}

/// Remove a file, treating "already gone" as success. Returns whether a file was removed.
async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn sample_meta() -> EntryMeta {
        EntryMeta {
            content_type: "application/pdf".to_string(),
            content_disposition: "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
                .to_string(),
        }
    }

    fn backdate(path: &Path, by: Duration) {
        let when = FileTime::from_system_time(SystemTime::now() - by);
        filetime::set_file_mtime(path, when).unwrap();
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn store_entry(store: &CacheStore, key: &CacheKey, body: &[u8]) {
        let mut writer = store.open_for_write(key).await.unwrap();
        writer.write_chunk(body).await.unwrap();
        writer.commit(&sample_meta()).await.unwrap();
    }

    async fn read_body(entry: &mut CachedEntry) -> Vec<u8> {
        let mut buf = Vec::new();
        entry.body.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::compute("https://example.com/a.pdf", Some("a.pdf"));
        let b = CacheKey::compute("https://example.com/a.pdf", Some("a.pdf"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 40);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_changes_with_either_component() {
        let base = CacheKey::compute("https://example.com/a", None);
        assert_ne!(base, CacheKey::compute("https://example.com/b", None));
        assert_ne!(base, CacheKey::compute("https://example.com/a", Some("a.txt")));
        assert_ne!(base, CacheKey::compute("https://example.com/a", Some("")));
        // Shifting bytes between url and filename must not collide
        assert_ne!(
            CacheKey::compute("https://x|y", None),
            CacheKey::compute("https://x", Some("y"))
        );
        assert_ne!(
            CacheKey::compute("https://x|", Some("y")),
            CacheKey::compute("https://x", Some("|y"))
        );
    }

    #[tokio::test]
    async fn test_commit_then_lookup() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/report.pdf", None);

        assert!(store.lookup(&key).await.is_none());

        let mut writer = store.open_for_write(&key).await.unwrap();
        writer.write_chunk(b"%PDF-").await.unwrap();
        writer.write_chunk(b"1.7 body").await.unwrap();
        assert_eq!(writer.bytes_written(), 13);
        assert_eq!(writer.commit(&sample_meta()).await.unwrap(), 13);

        let mut entry = store.lookup(&key).await.expect("entry should be cached");
        assert_eq!(entry.meta, sample_meta());
        assert_eq!(entry.size, 13);
        assert_eq!(read_body(&mut entry).await, b"%PDF-1.7 body");

        let meta_name = format!("{}.meta.json", key);
        assert_eq!(file_names(dir.path()), vec![key.to_string(), meta_name]);
    }

    #[tokio::test]
    async fn test_metadata_has_exactly_two_fields() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/x", None);
        store_entry(&store, &key, b"x").await;

        let raw = std::fs::read(dir.path().join(format!("{}.meta.json", key))).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["contentType"], "application/pdf");
        assert!(object["contentDisposition"]
            .as_str()
            .unwrap()
            .starts_with("attachment;"));
    }

    #[tokio::test]
    async fn test_half_entries_are_misses() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();

        let body_only = CacheKey::compute("https://example.com/body-only", None);
        std::fs::write(dir.path().join(body_only.as_str()), b"data").unwrap();
        assert!(store.lookup(&body_only).await.is_none());

        let meta_only = CacheKey::compute("https://example.com/meta-only", None);
        std::fs::write(
            dir.path().join(format!("{}.meta.json", meta_only)),
            serde_json::to_vec(&sample_meta()).unwrap(),
        )
        .unwrap();
        assert!(store.lookup(&meta_only).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_metadata_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/broken", None);
        store_entry(&store, &key, b"data").await;

        std::fs::write(dir.path().join(format!("{}.meta.json", key)), b"{not json").unwrap();
        assert!(store.lookup(&key).await.is_none());

        std::fs::write(
            dir.path().join(format!("{}.meta.json", key)),
            br#"{"contentType":"text/plain"}"#,
        )
        .unwrap();
        assert!(store.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_discarded_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/partial", None);

        let mut writer = store.open_for_write(&key).await.unwrap();
        writer.write_chunk(b"half of the").await.unwrap();
        writer.discard();

        let mut dropped = store.open_for_write(&key).await.unwrap();
        dropped.write_chunk(b"other half").await.unwrap();
        drop(dropped);

        assert!(store.lookup(&key).await.is_none());
        assert!(file_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_recommit_overwrites_entry() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/v", None);

        store_entry(&store, &key, b"first").await;
        let mut writer = store.open_for_write(&key).await.unwrap();
        writer.write_chunk(b"second version").await.unwrap();
        let meta = EntryMeta {
            content_type: "text/plain".to_string(),
            content_disposition: "attachment; filename=\"v.txt\"".to_string(),
        };
        writer.commit(&meta).await.unwrap();

        let mut entry = store.lookup(&key).await.unwrap();
        assert_eq!(entry.meta, meta);
        assert_eq!(read_body(&mut entry).await, b"second version");
        assert_eq!(file_names(dir.path()).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_keep_pairs_together() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::open(dir.path().to_path_buf(), DAY).unwrap());
        let key = CacheKey::compute("https://example.com/contended", None);

        for round in 0..20 {
            let writers: Vec<_> = (0..4)
                .map(|n| {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    tokio::spawn(async move {
                        let body = format!("body-{}-{}", round, n);
                        let mut writer = store.open_for_write(&key).await.unwrap();
                        writer.write_chunk(body.as_bytes()).await.unwrap();
                        let meta = EntryMeta {
                            content_type: "text/plain".to_string(),
                            content_disposition: format!("attachment; filename=\"{}\"", body),
                        };
                        writer.commit(&meta).await.unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let mut entry = store.lookup(&key).await.unwrap();
            let body = String::from_utf8(read_body(&mut entry).await).unwrap();
            assert_eq!(
                entry.meta.content_disposition,
                format!("attachment; filename=\"{}\"", body)
            );
        }
        assert_eq!(file_names(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_is_miss_but_stays_until_evicted() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let key = CacheKey::compute("https://example.com/old.bin", None);
        store_entry(&store, &key, b"old bytes").await;

        let body = dir.path().join(key.as_str());
        let meta = dir.path().join(format!("{}.meta.json", key));

        // Past freshness, inside the eviction window
        backdate(&body, DAY + Duration::from_secs(3600));
        assert!(store.lookup(&key).await.is_none());
        let report = store.evict_expired(2 * DAY).await;
        assert_eq!(report.removed, 0);
        assert!(body.exists());
        assert!(meta.exists());

        // Past the eviction window
        backdate(&body, 2 * DAY + Duration::from_secs(60));
        let report = store.evict_expired(2 * DAY).await;
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);
        assert!(!body.exists());
        assert!(!meta.exists());
    }

    #[tokio::test]
    async fn test_sweep_only_removes_stale_pair() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        let fresh = CacheKey::compute("https://example.com/fresh", None);
        let stale = CacheKey::compute("https://example.com/stale", None);
        store_entry(&store, &fresh, b"fresh").await;
        store_entry(&store, &stale, b"stale").await;

        let stale_body = dir.path().join(stale.as_str());
        let stale_meta = dir.path().join(format!("{}.meta.json", stale));
        backdate(&stale_body, 3 * DAY);
        // A stale metadata record must not be evicted on its own
        backdate(&dir.path().join(format!("{}.meta.json", fresh)), 3 * DAY);

        let report = store.evict_expired(2 * DAY).await;
        assert_eq!(report.removed, 2);
        assert!(!stale_body.exists());
        assert!(!stale_meta.exists());
        assert_eq!(
            file_names(dir.path()),
            {
                let mut names = vec![fresh.to_string(), format!("{}.meta.json", fresh)];
                names.sort();
                names
            }
        );
        assert!(store.lookup(&fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans_and_abandoned_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();

        let orphan = dir.path().join("0123abcd.meta.json");
        std::fs::write(&orphan, b"{}").unwrap();
        backdate(&orphan, 3 * DAY);

        let abandoned = dir.path().join(".abandoned.tmp");
        std::fs::write(&abandoned, b"partial").unwrap();
        backdate(&abandoned, 3 * DAY);

        let in_flight = dir.path().join(".in-flight.tmp");
        std::fs::write(&in_flight, b"partial").unwrap();

        let report = store.evict_expired(2 * DAY).await;
        assert_eq!(report.removed, 2);
        assert!(!orphan.exists());
        assert!(!abandoned.exists());
        assert!(in_flight.exists());
    }

    #[tokio::test]
    async fn test_sweep_on_missing_directory_reports_failure() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let store = CacheStore::open(root.clone(), DAY).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let report = store.evict_expired(DAY).await;
        assert_eq!(report, SweepReport { removed: 0, failed: 1 });
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".leftover.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("abc"), b"body").unwrap();

        let store = CacheStore::open(dir.path().to_path_buf(), DAY).unwrap();
        assert_eq!(store.cache_dir(), dir.path());
        assert_eq!(file_names(dir.path()), vec!["abc".to_string()]);
    }
}
