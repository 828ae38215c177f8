//! Size-bounded eviction
//!
//! The policy is all-or-nothing: once the cache grows past its ceiling the
//! whole directory is purged. There is no partial or LRU eviction.

use crate::store::DiskStore;
use crate::types::ClearReport;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a size check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvictionOutcome {
    /// Size was within the limit; nothing was touched
    Kept { size: u64, limit: u64 },
    /// Size exceeded the limit and the store was cleared
    Cleared {
        size: u64,
        limit: u64,
        report: ClearReport,
    },
}

impl EvictionOutcome {
    pub fn was_cleared(&self) -> bool {
        matches!(self, EvictionOutcome::Cleared { .. })
    }
}

pub struct SizeBoundedEvictor {
    store: Arc<DiskStore>,
    limit: u64,
}

impl SizeBoundedEvictor {
    pub fn new(store: Arc<DiskStore>, limit: u64) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Check against the configured limit
    pub async fn enforce(&self) -> EvictionOutcome {
        self.evict_if_over_limit(self.limit).await
    }

    /// Clear the store if its size is strictly greater than `limit`
    pub async fn evict_if_over_limit(&self, limit: u64) -> EvictionOutcome {
        let size = self.store.size_bytes().await;

        if size <= limit {
            debug!(size, limit, "Cache within size limit");
            return EvictionOutcome::Kept { size, limit };
        }

        info!(size, limit, "Cache size exceeds limit, clearing");
        let report = self.store.clear().await;
        EvictionOutcome::Cleared {
            size,
            limit,
            report,
        }
    }
}
