//! Cache types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default cache ceiling: 50 MiB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_PRESSURE_POLL_SECS: u64 = 5;
pub const DEFAULT_FILE_EXTENSION: &str = "jpg";

/// Configuration shared by the store, gateway and pressure monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cached blobs; created lazily
    pub cache_dir: PathBuf,
    /// Size ceiling in bytes above which the whole cache is purged
    pub max_cache_size: u64,
    pub request_timeout_secs: u64,
    /// Fraction of total memory (0–1) above which the host is under pressure
    pub pressure_threshold: f64,
    pub pressure_poll_interval_secs: u64,
    /// Extension appended to every cache file name, without the dot
    pub file_extension: String,
    /// Collapse concurrent fetches of the same identifier
    pub dedupe_in_flight: bool,
    /// Run the size check after every successful cache write
    pub evict_after_put: bool,
}

impl CacheConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pressure_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pressure_poll_interval_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("ImageCache"),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            pressure_poll_interval_secs: DEFAULT_PRESSURE_POLL_SECS,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            dedupe_in_flight: true,
            evict_after_put: false,
        }
    }
}

/// Statistics about the cache, read from the filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
}

/// Outcome of a best-effort clear
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub removed: usize,
    pub failed: usize,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Point-in-time memory usage of this process against the host total
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub under_pressure: bool,
}

impl MemoryInfo {
    pub fn new(used_bytes: u64, total_bytes: u64, threshold: f64) -> Self {
        let under_pressure = total_bytes > 0 && used_bytes as f64 > total_bytes as f64 * threshold;
        Self {
            used_bytes,
            total_bytes,
            under_pressure,
        }
    }

    /// Used memory as a percentage of total, 0 when total is unknown
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}
