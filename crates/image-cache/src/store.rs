//! Content-addressed blob storage on disk
//!
//! Each identifier maps to one file named after its [`CacheKey`]. Entry size
//! and existence are always read back from the filesystem; nothing is tracked
//! in memory, so the store survives other processes wiping the directory.

use crate::error::Result;
use crate::key::CacheKey;
use crate::types::{CacheConfig, CacheStats, ClearReport};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// In-progress writes are hidden files; keys are hex digests and never
/// start with a dot, whatever the configured extension
const TEMP_PREFIX: char = '.';
const TEMP_SUFFIX: &str = ".partial";

/// A keyed blob store backed by a single directory
pub struct DiskStore {
    cache_dir: PathBuf,
    extension: String,
    /// Writers (put, clear) are exclusive; readers share
    lock: RwLock<()>,
}

impl DiskStore {
    pub fn new(cache_dir: PathBuf, extension: impl Into<String>) -> Self {
        Self {
            cache_dir,
            extension: extension.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.cache_dir.clone(), config.file_extension.clone())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn key_for(&self, identifier: &str) -> CacheKey {
        CacheKey::derive(identifier, &self.extension)
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.cache_dir.join(self.key_for(identifier).as_str())
    }

    /// Ensure the cache directory exists. Safe to call repeatedly.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        fs::create_dir_all(&self.cache_dir).await?;
        info!(cache_dir = ?self.cache_dir, "Cache initialized");
        Ok(())
    }

    /// Store `data` under `identifier`, replacing any previous entry.
    ///
    /// The blob is written to a temporary file and renamed into place, so
    /// readers see either the old entry or the complete new one.
    pub async fn put(&self, identifier: &str, data: &[u8]) -> Result<()> {
        let key = self.key_for(identifier);
        let path = self.cache_dir.join(key.as_str());
        let tmp_path = self.cache_dir.join(format!("{}{}{}", TEMP_PREFIX, key, TEMP_SUFFIX));

        let _guard = self.lock.write().await;

        if let Err(e) = fs::create_dir_all(&self.cache_dir).await {
            warn!(cache_dir = ?self.cache_dir, error = %e, "Failed to create cache directory");
            return Err(e.into());
        }

        if let Err(e) = write_then_rename(&tmp_path, &path, data).await {
            warn!(key = %key, error = %e, "Failed to cache blob");
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Cached blob");
        Ok(())
    }

    /// Read the blob stored under `identifier`; `None` means not cached
    pub async fn get(&self, identifier: &str) -> Option<Vec<u8>> {
        let key = self.key_for(identifier);
        let path = self.cache_dir.join(key.as_str());

        let _guard = self.lock.read().await;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(key = %key, size = data.len(), "Cache hit");
                Some(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached file");
                None
            }
        }
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        let path = self.path_for(identifier);
        let _guard = self.lock.read().await;
        fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Remove every entry. Each removal is attempted independently; failures
    /// are logged and counted but never stop the sweep.
    pub async fn clear(&self) -> ClearReport {
        let _guard = self.lock.write().await;
        let mut report = ClearReport::default();

        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return report,
            Err(e) => {
                warn!(cache_dir = ?self.cache_dir, error = %e, "Failed to list cache directory");
                return report;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    report.failed += 1;
                    break;
                }
            };

            let path = entry.path();
            let removed = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path).await,
                _ => fs::remove_file(&path).await,
            };

            match removed {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to remove cached file");
                    report.failed += 1;
                }
            }
        }

        info!(
            removed = report.removed,
            failed = report.failed,
            "Cache cleared"
        );
        report
    }

    /// Total bytes of all entries; 0 if the directory is missing or unreadable
    pub async fn size_bytes(&self) -> u64 {
        self.stats().await.total_size
    }

    pub async fn stats(&self) -> CacheStats {
        let _guard = self.lock.read().await;
        self.scan().await
    }

    async fn scan(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        let Ok(mut dir) = fs::read_dir(&self.cache_dir).await else {
            return stats;
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => {
                    stats.entries += 1;
                    stats.total_size += meta.len();
                }
                _ => {}
            }
        }

        stats
    }
}

async fn write_then_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(tmp_path, data).await?;
    fs::rename(tmp_path, path).await
}
