// src/kitchen/fetch.rs

//! Source fetching with integrity verification
//!
//! Sources are copied or downloaded into the cache's `sources/` directory,
//! named by their expected checksum. A file only ever appears there after
//! its checksum has been verified, so a present file is trusted as-is on
//! later builds.

use crate::error::BuildError;
use crate::hash::{verify_file, ContentHash};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (5 minutes, source archives are large)
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a source URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Http(String),
    Local(PathBuf),
}

impl SourceLocation {
    /// Classify a URI; relative paths are resolved against `base`
    pub fn parse(uri: &str, base: Option<&Path>) -> Self {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return SourceLocation::Http(uri.to_string());
        }

        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        match base {
            Some(base) if path.is_relative() => SourceLocation::Local(base.join(path)),
            _ => SourceLocation::Local(path.to_path_buf()),
        }
    }
}

/// Downloads and verifies sources
pub struct SourceFetcher {
    cache_dir: PathBuf,
    /// Base directory for relative source paths
    base_dir: Option<PathBuf>,
    max_retries: u32,
    retry_delay: Duration,
    client: OnceLock<Client>,
}

impl SourceFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_dir: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            client: OnceLock::new(),
        }
    }

    pub fn with_base_dir(mut self, base: Option<PathBuf>) -> Self {
        self.base_dir = base;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Path a verified source with this checksum is stored at
    pub fn cached_path(&self, checksum: &ContentHash) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", checksum.algorithm.name(), checksum.as_str()))
    }

    /// Fetch a source and return the path of the verified file
    pub fn fetch(&self, uri: &str, checksum: &ContentHash) -> Result<PathBuf, BuildError> {
        let cached = self.cached_path(checksum);
        if cached.is_file() {
            debug!("Using cached source for {}", uri);
            return Ok(cached);
        }

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| fetch_err(format!("cannot create {}: {}", self.cache_dir.display(), e)))?;

        // Unique partial name so concurrent fetches of one source never collide
        let partial = self
            .cache_dir
            .join(format!(".partial-{}", uuid::Uuid::new_v4()));

        let result = match SourceLocation::parse(uri, self.base_dir.as_deref()) {
            SourceLocation::Http(url) => self.download(&url, &partial),
            SourceLocation::Local(path) => fs::copy(&path, &partial)
                .map(|_| ())
                .map_err(|e| fetch_err(format!("cannot read {}: {}", path.display(), e))),
        };

        let verified = result.and_then(|()| match verify_file(&partial, checksum) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(mismatch)) => Err(fetch_err(format!("{}: {}", uri, mismatch))),
            Err(e) => Err(fetch_err(format!("cannot verify {}: {}", uri, e))),
        });

        if let Err(e) = verified {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        fs::rename(&partial, &cached)
            .map_err(|e| fetch_err(format!("cannot store {}: {}", cached.display(), e)))?;
        info!("Fetched and verified {}", uri);
        Ok(cached)
    }

    fn client(&self) -> Result<&Client, BuildError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| fetch_err(format!("failed to create HTTP client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), BuildError> {
        let client = self.client()?;
        let mut delay = self.retry_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match download_once(client, url, dest) {
                Ok(bytes) => {
                    debug!("Downloaded {} ({} bytes)", url, bytes);
                    return Ok(());
                }
                Err(e) if attempt >= self.max_retries => {
                    return Err(fetch_err(format!(
                        "failed to download {} after {} attempts: {}",
                        url, attempt, e
                    )));
                }
                Err(e) => {
                    warn!(
                        "Download of {} failed (attempt {}/{}): {}",
                        url, attempt, self.max_retries, e
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

fn download_once(client: &Client, url: &str, dest: &Path) -> io::Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(io::Error::other)?;
    let mut file = File::create(dest)?;
    response.copy_to(&mut file).map_err(io::Error::other)
}

fn fetch_err(msg: String) -> BuildError {
    BuildError::SourceFetch(msg)
}

/// Unpack a tar archive into `dest`, returning the source root
///
/// When the archive holds a single top-level directory, that directory is
/// the source root.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf, BuildError> {
    // GNU and BSD tar both detect compression when reading from a file
    let output = Command::new("tar")
        .arg("-xf")
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .output()
        .map_err(|e| fetch_err(format!("tar failed: {}", e)))?;

    if !output.status.success() {
        return Err(fetch_err(format!(
            "failed to extract archive: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let entries: Vec<PathBuf> = fs::read_dir(dest)
        .map_err(|e| fetch_err(format!("cannot read {}: {}", dest.display(), e)))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();

    if let [single] = entries.as_slice() {
        if single.is_dir() {
            return Ok(single.clone());
        }
    }
    Ok(dest.to_path_buf())
}

/// File name for an unpacked source taken from the last URI segment
pub fn source_file_name(uri: &str) -> &str {
    uri.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("source")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use tempfile::TempDir;

    #[test]
    fn test_source_location() {
        assert_eq!(
            SourceLocation::parse("https://example.com/a.tar.gz", None),
            SourceLocation::Http("https://example.com/a.tar.gz".to_string())
        );
        assert_eq!(
            SourceLocation::parse("file:///srv/a.tar", None),
            SourceLocation::Local(PathBuf::from("/srv/a.tar"))
        );
        assert_eq!(
            SourceLocation::parse("files/a.tar", Some(Path::new("/recipes"))),
            SourceLocation::Local(PathBuf::from("/recipes/files/a.tar"))
        );
        assert_eq!(
            SourceLocation::parse("/abs/a.tar", Some(Path::new("/recipes"))),
            SourceLocation::Local(PathBuf::from("/abs/a.tar"))
        );
    }

    #[test]
    fn test_fetch_local_verified_and_cached() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("hello.txt");
        fs::write(&src, "hello").unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"hello");

        let fetcher = SourceFetcher::new(temp.path().join("sources"));
        let path = fetcher
            .fetch(&format!("file://{}", src.display()), &checksum)
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        // Served from the source cache once the original is gone
        fs::remove_file(&src).unwrap();
        assert_eq!(fetcher.fetch(src.to_str().unwrap(), &checksum).unwrap(), path);
    }

    #[test]
    fn test_fetch_checksum_mismatch() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("hello.txt");
        fs::write(&src, "tampered").unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"hello");

        let fetcher = SourceFetcher::new(temp.path().join("sources"));
        let err = fetcher.fetch(src.to_str().unwrap(), &checksum).unwrap_err();
        assert!(matches!(err, BuildError::SourceFetch(ref msg) if msg.contains("mismatch")));
        assert!(!fetcher.cached_path(&checksum).exists());
        assert_eq!(fs::read_dir(temp.path().join("sources")).unwrap().count(), 0);
    }

    #[test]
    fn test_fetch_missing_file() {
        let temp = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(temp.path().join("sources"));
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"x");
        assert!(matches!(
            fetcher.fetch("/nonexistent/source.tar", &checksum),
            Err(BuildError::SourceFetch(_))
        ));
    }

    #[test]
    fn test_unpack_single_top_level_dir() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("pkg-1.0")).unwrap();
        fs::write(tree.join("pkg-1.0").join("configure"), "#!/bin/sh\n").unwrap();

        let archive = temp.path().join("pkg.tar");
        let status = Command::new("tar")
            .arg("-cf")
            .arg(&archive)
            .arg("-C")
            .arg(&tree)
            .arg("pkg-1.0")
            .status()
            .unwrap();
        assert!(status.success());

        let dest = temp.path().join("src");
        fs::create_dir_all(&dest).unwrap();
        let root = unpack(&archive, &dest).unwrap();
        assert_eq!(root, dest.join("pkg-1.0"));
        assert!(root.join("configure").exists());
    }

    #[test]
    fn test_source_file_name() {
        assert_eq!(source_file_name("https://x.org/a/zlib-1.3.tar.gz"), "zlib-1.3.tar.gz");
        assert_eq!(source_file_name("/srv/patch.diff"), "patch.diff");
        assert_eq!(source_file_name("https://x.org/"), "source");
    }
}
