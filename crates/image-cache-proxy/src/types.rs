//! Core types for the image cache proxy

use image_cache::{CacheConfig, CacheStats, ClearReport, MemoryInfo};
use serde::{Deserialize, Serialize};

/// Maximum number of placeholder URLs on offer
pub const MAX_PLACEHOLDERS: usize = 10;

/// Configuration for the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache: CacheConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceholderQuery {
    pub count: Option<usize>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub memory: MemoryInfo,
    pub monitoring: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub report: ClearReport,
    pub cache: CacheStats,
}

/// Demo image URLs served when the host has nothing better to show
pub fn placeholder_urls(count: usize) -> Vec<String> {
    (1..=count.min(MAX_PLACEHOLDERS))
        .map(|i| format!("https://picsum.photos/200/300?random={}", i))
        .collect()
}
