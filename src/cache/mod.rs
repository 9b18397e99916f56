// src/cache/mod.rs

//! Content-addressed artifact cache
//!
//! Build outputs are stored under the content hash of everything that went
//! into the build (see [`artifact_key`]). Layout under the cache root:
//!
//! ```text
//! artifacts/<hash[0..2]>/<hash>/out/        built output tree
//! artifacts/<hash[0..2]>/<hash>/build.log   captured step output
//! artifacts/<hash[0..2]>/<hash>/meta.json   ArtifactMeta
//! staging/<uuid>/                           in-progress builds
//! sources/<checksum>                        verified source downloads
//! logs/<name>@<version>.log                 build log of the last failure
//! ```
//!
//! Executors only ever write into a staging directory. [`ArtifactCache::commit`]
//! moves it into place with a single rename, so an entry is either fully
//! present or absent. Commits for the same hash are serialized; the first
//! one wins and later ones discard their staged output. A committed `out/`
//! tree is made read-only.

mod key;

pub use key::artifact_key;

use crate::error::CacheError;
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ARTIFACTS_DIR: &str = "artifacts";
const STAGING_DIR: &str = "staging";
const SOURCES_DIR: &str = "sources";
const LOGS_DIR: &str = "logs";
const OUT_DIR: &str = "out";
const LOG_FILE: &str = "build.log";
const META_FILE: &str = "meta.json";

/// Configuration for the artifact cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for all cache state
    pub root: PathBuf,
    /// Attempts for each cache I/O operation before giving up
    pub retry_attempts: u32,
    /// Delay before the first retry; doubled on each further attempt
    pub retry_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/cache/galley"),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl CacheConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

/// Metadata stored alongside each artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Hex content hash this entry is stored under
    pub hash: String,
    /// `name@version` of the recipe that produced it
    pub recipe: String,
    pub created: DateTime<Utc>,
    /// Size of the `out/` tree in bytes
    pub size: u64,
}

/// A committed, durable build output
#[derive(Debug, Clone)]
pub struct Artifact {
    pub hash: ContentHash,
    /// Entry directory
    pub path: PathBuf,
    pub meta: ArtifactMeta,
}

impl Artifact {
    pub fn out_dir(&self) -> PathBuf {
        self.path.join(OUT_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }
}

/// Build output in a staging directory, not yet visible under any hash
#[derive(Debug)]
pub struct StagedArtifact {
    dir: PathBuf,
    recipe: String,
}

impl StagedArtifact {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.join(OUT_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn recipe(&self) -> &str {
        &self.recipe
    }

    /// Remove the staging directory without committing it
    pub fn discard(self) {
        if let Err(e) = remove_tree(&self.dir) {
            warn!("Failed to remove staging dir {}: {}", self.dir.display(), e);
        }
    }
}

/// Limits applied by [`ArtifactCache::gc`]
#[derive(Debug, Clone)]
pub struct GcPolicy {
    /// Remove entries not used for longer than this
    pub max_age: Option<Duration>,
    /// Evict least recently used entries until the total fits
    pub max_size: Option<u64>,
    /// Staging directories older than this belong to dead builds
    pub staging_max_age: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            max_age: None,
            max_size: None,
            staging_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What a garbage collection pass removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub removed_entries: u64,
    pub removed_staging: u64,
    pub freed_bytes: u64,
}

/// Cache statistics
#[derive(Debug)]
pub struct CacheStats {
    /// Total size of cached artifacts in bytes
    pub total_size: u64,
    /// Number of cached entries
    pub entry_count: u64,
    /// Staging directories currently present
    pub staging_count: u64,
    /// Least recently used entry
    pub oldest: Option<SystemTime>,
    /// Most recently used entry
    pub newest: Option<SystemTime>,
}

struct EntryInfo {
    path: PathBuf,
    last_used: SystemTime,
    size: u64,
}

/// Content-addressed artifact store
#[derive(Debug)]
pub struct ArtifactCache {
    config: CacheConfig,
    /// Per-hash commit locks
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    /// Open a cache, creating its directory layout if needed
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        for dir in [ARTIFACTS_DIR, STAGING_DIR, SOURCES_DIR, LOGS_DIR] {
            let path = config.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
        }

        debug!("Opened artifact cache at {}", config.root.display());
        Ok(Self {
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Directory holding verified source downloads
    pub fn sources_dir(&self) -> PathBuf {
        self.config.root.join(SOURCES_DIR)
    }

    /// Where the build log of a failed build of `recipe` is kept
    pub fn failure_log_path(&self, recipe: &str) -> PathBuf {
        self.config
            .root
            .join(LOGS_DIR)
            .join(format!("{}.log", recipe.replace('/', "_")))
    }

    /// Keep the build log of a staged build that is about to be discarded
    ///
    /// Returns `None` when the build never got as far as writing a log.
    pub fn save_failure_log(&self, staged: &StagedArtifact) -> Result<Option<PathBuf>, CacheError> {
        let log = staged.log_path();
        if !log.exists() {
            return Ok(None);
        }
        let dest = self.failure_log_path(&staged.recipe);
        self.with_retry("save build log", || {
            fs::copy(&log, &dest).map_err(|e| CacheError::io(&dest, e))
        })?;
        debug!("Kept build log of {} at {}", staged.recipe, dest.display());
        Ok(Some(dest))
    }

    /// Get the entry directory for a given hash
    fn entry_path(&self, hash: &ContentHash) -> PathBuf {
        // Use first 2 chars as subdirectory for sharding
        let value = hash.as_str();
        self.config
            .root
            .join(ARTIFACTS_DIR)
            .join(&value[..2.min(value.len())])
            .join(value)
    }

    /// Find a committed artifact
    ///
    /// A hit refreshes the entry's last-used time for LRU eviction. Entries
    /// with unreadable metadata are removed and reported as a miss.
    pub fn lookup(&self, hash: &ContentHash) -> Result<Option<Artifact>, CacheError> {
        let path = self.entry_path(hash);
        let meta_path = path.join(META_FILE);

        if !meta_path.exists() {
            debug!("Cache miss: {:.16}", hash.as_str());
            return Ok(None);
        }

        let meta = match self.with_retry("read metadata", || read_meta(&meta_path, hash)) {
            Ok(meta) => meta,
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!("Cache corruption detected: {:.16} ({})", hash.as_str(), reason);
                let _ = remove_tree(&path);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        touch(&meta_path);
        debug!("Cache hit: {:.16} ({})", hash.as_str(), meta.recipe);

        Ok(Some(Artifact {
            hash: hash.clone(),
            path,
            meta,
        }))
    }

    /// Create a fresh staging directory for one build
    pub fn stage(&self, recipe: &str) -> Result<StagedArtifact, CacheError> {
        let dir = self
            .config
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        let out = dir.join(OUT_DIR);

        self.with_retry("create staging dir", || {
            fs::create_dir_all(&out).map_err(|e| CacheError::io(&out, e))
        })?;

        Ok(StagedArtifact {
            dir,
            recipe: recipe.to_string(),
        })
    }

    /// Atomically publish a staged build under `hash`
    ///
    /// If the hash is already present, the staged copy is discarded and the
    /// existing artifact returned. On error the staged copy is discarded too.
    pub fn commit(&self, hash: &ContentHash, staged: StagedArtifact) -> Result<Artifact, CacheError> {
        let lock = self.key_lock(hash);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.publish(hash, staged)
        };
        drop(lock);
        self.release_lock(hash);
        result
    }

    fn publish(&self, hash: &ContentHash, staged: StagedArtifact) -> Result<Artifact, CacheError> {
        let existing = match self.lookup(hash) {
            Ok(existing) => existing,
            Err(e) => {
                staged.discard();
                return Err(e);
            }
        };
        if let Some(existing) = existing {
            warn!(
                "Artifact {:.16} already committed, discarding staged build of {}",
                hash.as_str(),
                staged.recipe
            );
            staged.discard();
            return Ok(existing);
        }

        let target = self.entry_path(hash);
        let meta = match self.move_into_place(hash, &staged, &target) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                warn!("Lost commit race for {:.16}, discarding staged build", hash.as_str());
                staged.discard();
                return self.lookup(hash)?.ok_or_else(|| CacheError::Corrupt {
                    hash: hash.as_str().to_string(),
                    reason: "entry vanished after concurrent commit".to_string(),
                });
            }
            Err(e) => {
                warn!("Failed to commit {}: {}", staged.recipe, e);
                staged.discard();
                return Err(e);
            }
        };

        seal(&target.join(OUT_DIR));
        info!(
            "Cached: {} as {:.16} ({} bytes)",
            meta.recipe,
            hash.as_str(),
            meta.size
        );

        Ok(Artifact {
            hash: hash.clone(),
            path: target,
            meta,
        })
    }

    /// Write metadata and rename the staging directory to `target`
    ///
    /// `Ok(None)` means another process published the same hash first.
    fn move_into_place(
        &self,
        hash: &ContentHash,
        staged: &StagedArtifact,
        target: &Path,
    ) -> Result<Option<ArtifactMeta>, CacheError> {
        let meta = ArtifactMeta {
            hash: hash.as_str().to_string(),
            recipe: staged.recipe.clone(),
            created: Utc::now(),
            size: dir_size(&staged.out_dir()),
        };

        let staged_meta = staged.dir.join(META_FILE);
        self.with_retry("write metadata", || write_meta(&staged_meta, &meta))?;

        if let Some(shard) = target.parent() {
            self.with_retry("create shard dir", || {
                fs::create_dir_all(shard).map_err(|e| CacheError::io(shard, e))
            })?;
        }

        let renamed = self.with_retry("publish artifact", || {
            match fs::rename(&staged.dir, target) {
                Ok(()) => Ok(true),
                Err(_) if target.join(META_FILE).exists() => Ok(false),
                Err(e) => Err(CacheError::io(target, e)),
            }
        })?;

        Ok(renamed.then_some(meta))
    }

    fn key_lock(&self, hash: &ContentHash) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(hash.as_str().to_string()).or_default())
    }

    /// Drop the commit lock for `hash` once no other commit holds it
    fn release_lock(&self, hash: &ContentHash) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(hash.as_str())
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(hash.as_str());
        }
    }

    /// Run an I/O operation, retrying with exponential backoff
    ///
    /// Corruption is not retried.
    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut delay = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e @ CacheError::Corrupt { .. }) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!("Cache {} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    fn entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        let artifacts = self.config.root.join(ARTIFACTS_DIR);
        let mut entries = Vec::new();

        for shard in read_dir(&artifacts)? {
            if !shard.is_dir() {
                continue;
            }
            for path in read_dir(&shard)? {
                let meta_path = path.join(META_FILE);
                let last_used = fs::metadata(&meta_path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                let size = dir_size(&path);
                entries.push(EntryInfo {
                    path,
                    last_used,
                    size,
                });
            }
        }

        Ok(entries)
    }

    /// Remove stale staging directories and evict entries per `policy`
    pub fn gc(&self, policy: &GcPolicy) -> Result<GcReport, CacheError> {
        let mut report = GcReport::default();
        let now = SystemTime::now();

        for dir in read_dir(&self.config.root.join(STAGING_DIR))? {
            let modified = fs::metadata(&dir)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age >= policy.staging_max_age {
                debug!("Removing stale staging dir {}", dir.display());
                report.freed_bytes += dir_size(&dir);
                remove_tree(&dir).map_err(|e| CacheError::io(&dir, e))?;
                report.removed_staging += 1;
            }
        }

        let mut entries = self.entries()?;

        if let Some(max_age) = policy.max_age {
            let (expired, kept): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| {
                now.duration_since(e.last_used).unwrap_or(Duration::ZERO) > max_age
            });
            for entry in expired {
                self.evict(&entry, &mut report)?;
            }
            entries = kept;
        }

        if let Some(max_size) = policy.max_size {
            let mut total: u64 = entries.iter().map(|e| e.size).sum();
            // Oldest first
            entries.sort_by_key(|e| e.last_used);
            for entry in &entries {
                if total <= max_size {
                    break;
                }
                self.evict(entry, &mut report)?;
                total = total.saturating_sub(entry.size);
            }
        }

        info!(
            "Cache gc removed {} entries and {} staging dirs ({} bytes)",
            report.removed_entries, report.removed_staging, report.freed_bytes
        );
        Ok(report)
    }

    fn evict(&self, entry: &EntryInfo, report: &mut GcReport) -> Result<(), CacheError> {
        debug!("Evicting {} ({} bytes)", entry.path.display(), entry.size);
        remove_tree(&entry.path).map_err(|e| CacheError::io(&entry.path, e))?;
        if let Some(shard) = entry.path.parent() {
            // Only succeeds once the shard is empty
            let _ = fs::remove_dir(shard);
        }
        report.removed_entries += 1;
        report.freed_bytes += entry.size;
        Ok(())
    }

    /// Clear all cached artifacts, staging directories and failure logs
    ///
    /// Verified sources are kept.
    pub fn clear(&self) -> Result<u64, CacheError> {
        let removed = self.entries()?.len() as u64;

        for dir in [ARTIFACTS_DIR, STAGING_DIR, LOGS_DIR] {
            let path = self.config.root.join(dir);
            remove_tree(&path).map_err(|e| CacheError::io(&path, e))?;
            fs::create_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
        }

        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries()?;
        let staging_count = read_dir(&self.config.root.join(STAGING_DIR))?.len() as u64;

        Ok(CacheStats {
            total_size: entries.iter().map(|e| e.size).sum(),
            entry_count: entries.len() as u64,
            staging_count,
            oldest: entries.iter().map(|e| e.last_used).min(),
            newest: entries.iter().map(|e| e.last_used).max(),
        })
    }
}

fn read_meta(path: &Path, hash: &ContentHash) -> Result<ArtifactMeta, CacheError> {
    let data = fs::read(path).map_err(|e| CacheError::io(path, e))?;
    let meta: ArtifactMeta = serde_json::from_slice(&data).map_err(|e| CacheError::Corrupt {
        hash: hash.as_str().to_string(),
        reason: e.to_string(),
    })?;
    if meta.hash != hash.as_str() {
        return Err(CacheError::Corrupt {
            hash: hash.as_str().to_string(),
            reason: format!("metadata names hash {}", meta.hash),
        });
    }
    Ok(meta)
}

fn write_meta(path: &Path, meta: &ArtifactMeta) -> Result<(), CacheError> {
    let data = serde_json::to_vec_pretty(meta).map_err(|e| CacheError::Corrupt {
        hash: meta.hash.clone(),
        reason: e.to_string(),
    })?;
    fs::write(path, data).map_err(|e| CacheError::io(path, e))
}

/// Refresh the modification time used for LRU ordering
fn touch(path: &Path) {
    let result = File::options()
        .append(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!("Failed to touch {}: {}", path.display(), e);
    }
}

/// Make a committed output tree read-only
fn seal(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_symlink() {
            continue;
        }
        let result = entry.metadata().map_err(io::Error::from).and_then(|m| {
            let mut perms = m.permissions();
            perms.set_mode(perms.mode() & !0o222);
            fs::set_permissions(entry.path(), perms)
        });
        if let Err(e) = result {
            warn!("Failed to make {} read-only: {}", entry.path().display(), e);
        }
    }
}

/// Remove a directory tree, restoring write access to sealed directories first
pub(crate) fn remove_tree(path: &Path) -> io::Result<()> {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Ok(m) = entry.metadata() {
            let mut perms = m.permissions();
            if perms.mode() & 0o200 == 0 {
                perms.set_mode(perms.mode() | 0o700);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
    fs::remove_dir_all(path)
}

fn read_dir(path: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(path, e)),
    };

    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| CacheError::io(path, e))?;
    paths.sort();
    Ok(paths)
}

/// Total size of regular files below `path`
pub(crate) fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use tempfile::TempDir;

    fn cache(temp: &TempDir) -> ArtifactCache {
        ArtifactCache::open(CacheConfig {
            root: temp.path().to_path_buf(),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(1),
        })
        .unwrap()
    }

    fn staged(cache: &ArtifactCache, content: &str) -> StagedArtifact {
        let staged = cache.stage("test@1.0").unwrap();
        fs::write(staged.out_dir().join("file.txt"), content).unwrap();
        fs::write(staged.log_path(), "log\n").unwrap();
        staged
    }

    fn key(s: &str) -> ContentHash {
        hash_bytes(HashAlgorithm::Sha256, s.as_bytes())
    }

    #[test]
    fn test_open_creates_layout() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        assert!(temp.path().join("artifacts").is_dir());
        assert!(temp.path().join("staging").is_dir());
        assert!(cache.sources_dir().is_dir());
    }

    #[test]
    fn test_commit_then_lookup() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let hash = key("a");

        assert!(cache.lookup(&hash).unwrap().is_none());

        let s = staged(&cache, "hello");
        let staging_dir = s.dir().to_path_buf();
        let artifact = cache.commit(&hash, s).unwrap();

        assert!(!staging_dir.exists());
        assert_eq!(artifact.meta.size, 5);
        assert_eq!(artifact.meta.recipe, "test@1.0");
        assert!(artifact.path.starts_with(temp.path().join("artifacts").join(&hash.value[..2])));
        assert_eq!(
            fs::read_to_string(artifact.out_dir().join("file.txt")).unwrap(),
            "hello"
        );

        let found = cache.lookup(&hash).unwrap().unwrap();
        assert_eq!(found.meta, artifact.meta);
        assert!(found.log_path().exists());
    }

    #[test]
    fn test_second_commit_discarded() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let hash = key("same");

        cache.commit(&hash, staged(&cache, "first")).unwrap();
        let second = staged(&cache, "second");
        let second_dir = second.dir().to_path_buf();
        let artifact = cache.commit(&hash, second).unwrap();

        assert!(!second_dir.exists());
        assert_eq!(
            fs::read_to_string(artifact.out_dir().join("file.txt")).unwrap(),
            "first"
        );
        assert_eq!(cache.stats().unwrap().entry_count, 1);
        assert_eq!(cache.stats().unwrap().staging_count, 0);
    }

    #[test]
    fn test_concurrent_commits_single_winner() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let hash = key("race");

        std::thread::scope(|s| {
            for i in 0..4 {
                let cache = &cache;
                let hash = &hash;
                s.spawn(move || {
                    let staged = staged(cache, &format!("writer {i}"));
                    cache.commit(hash, staged).unwrap();
                });
            }
        });

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.staging_count, 0);
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let hash = key("corrupt");

        let artifact = cache.commit(&hash, staged(&cache, "x")).unwrap();
        fs::write(artifact.path.join("meta.json"), "{ not json").unwrap();

        assert!(cache.lookup(&hash).unwrap().is_none());
        assert!(!artifact.path.exists());
    }

    #[test]
    fn test_gc_max_size_evicts_oldest() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        let old = cache.commit(&key("old"), staged(&cache, "aaaaaaaaaa")).unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .append(true)
            .open(old.path.join("meta.json"))
            .unwrap()
            .set_modified(past)
            .unwrap();
        let new = cache.commit(&key("new"), staged(&cache, "bbbbbbbbbb")).unwrap();

        let budget = dir_size(&new.path);
        let report = cache
            .gc(&GcPolicy {
                max_size: Some(budget),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.removed_entries, 1);
        assert!(!old.path.exists());
        assert!(new.path.exists());
    }

    #[test]
    fn test_gc_max_age_and_staging() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        let stale = cache.commit(&key("stale"), staged(&cache, "data")).unwrap();
        File::options()
            .append(true)
            .open(stale.path.join("meta.json"))
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();
        let fresh = cache.commit(&key("fresh"), staged(&cache, "data")).unwrap();
        let leftover = cache.stage("dead@1.0").unwrap();

        let report = cache
            .gc(&GcPolicy {
                max_age: Some(Duration::from_secs(3600)),
                max_size: None,
                staging_max_age: Duration::ZERO,
            })
            .unwrap();

        assert_eq!(report.removed_staging, 1);
        assert_eq!(report.removed_entries, 1);
        assert!(!leftover.dir().exists());
        assert!(!stale.path.exists());
        assert!(fresh.path.exists());
        assert_eq!(cache.stats().unwrap().staging_count, 0);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        cache.commit(&key("a"), staged(&cache, "a")).unwrap();
        cache.commit(&key("b"), staged(&cache, "b")).unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_size, 0);
        assert!(cache.sources_dir().is_dir());
    }

    #[test]
    fn test_failed_commit_discards_staging() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let hash = key("blocked");

        // A stray file where the entry directory belongs makes the rename fail
        let target = cache.entry_path(&hash);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "not a directory").unwrap();

        let s = staged(&cache, "data");
        let staging_dir = s.dir().to_path_buf();
        assert!(cache.commit(&hash, s).is_err());

        assert!(!staging_dir.exists());
        assert_eq!(cache.stats().unwrap().staging_count, 0);
    }

    #[test]
    fn test_committed_output_is_read_only() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let artifact = cache.commit(&key("sealed"), staged(&cache, "x")).unwrap();

        let file = artifact.out_dir().join("file.txt");
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o222, 0);
        assert_eq!(
            fs::metadata(artifact.out_dir()).unwrap().permissions().mode() & 0o222,
            0
        );

        // Sealed entries can still be evicted
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(!artifact.path.exists());
    }

    #[test]
    fn test_commit_locks_are_released() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        cache.commit(&key("a"), staged(&cache, "a")).unwrap();
        cache.commit(&key("a"), staged(&cache, "again")).unwrap();
        cache.commit(&key("b"), staged(&cache, "b")).unwrap();

        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let temp = TempDir::new().unwrap();
        let mut config = CacheConfig::with_root(temp.path());
        config.retry_attempts = 3;
        config.retry_backoff = Duration::from_millis(1);
        let cache = ArtifactCache::open(config).unwrap();

        let mut calls = 0;
        let value = cache
            .with_retry("flaky op", || {
                calls += 1;
                if calls < 3 {
                    Err(CacheError::io("flaky", io::Error::other("try again")))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_gives_up_after_attempts() {
        let temp = TempDir::new().unwrap();
        let mut config = CacheConfig::with_root(temp.path());
        config.retry_attempts = 3;
        config.retry_backoff = Duration::from_millis(1);
        let cache = ArtifactCache::open(config).unwrap();

        let mut calls = 0;
        let result: Result<(), _> = cache.with_retry("broken op", || {
            calls += 1;
            Err(CacheError::io("broken", io::Error::other("still broken")))
        });
        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert_eq!(calls, 3);

        let mut corrupt_calls = 0;
        let result: Result<(), _> = cache.with_retry("read metadata", || {
            corrupt_calls += 1;
            Err(CacheError::Corrupt {
                hash: "abc".into(),
                reason: "bad json".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(corrupt_calls, 1);
    }

    #[test]
    fn test_save_failure_log() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        let s = staged(&cache, "partial");
        let saved = cache.save_failure_log(&s).unwrap().unwrap();
        s.discard();

        assert_eq!(saved, cache.failure_log_path("test@1.0"));
        assert_eq!(fs::read_to_string(&saved).unwrap(), "log\n");

        let empty = cache.stage("nolog@1.0").unwrap();
        assert!(cache.save_failure_log(&empty).unwrap().is_none());
    }

    #[test]
    fn test_discard() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let s = cache.stage("x@1").unwrap();
        let dir = s.dir().to_path_buf();
        s.discard();
        assert!(!dir.exists());
    }
}
