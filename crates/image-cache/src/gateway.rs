//! Fetch-through gateway: disk cache first, network on a miss
//!
//! Concurrent fetches of the same identifier are collapsed by a per-key
//! async lock. The first caller performs the request; callers that queued
//! behind it re-check the store once the lock is released and are served
//! from disk. If the first request failed nothing was stored, so the next
//! caller issues its own request.

use crate::decode::{decode_image, FetchedImage};
use crate::error::FetchError;
use crate::eviction::SizeBoundedEvictor;
use crate::key::CacheKey;
use crate::source::ImageSource;
use crate::store::DiskStore;
use crate::types::CacheConfig;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type InFlightMap = Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>;

pub struct ImageGateway {
    store: Arc<DiskStore>,
    source: Arc<dyn ImageSource>,
    /// Size check run after every successful write, when enabled
    evictor: Option<SizeBoundedEvictor>,
    in_flight: Option<InFlightMap>,
}

impl ImageGateway {
    /// Gateway with single-flight enabled and no automatic eviction
    pub fn new(store: Arc<DiskStore>, source: Arc<dyn ImageSource>) -> Self {
        Self {
            store,
            source,
            evictor: None,
            in_flight: Some(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(
        config: &CacheConfig,
        store: Arc<DiskStore>,
        source: Arc<dyn ImageSource>,
    ) -> Self {
        let mut gateway = Self::new(store, source);
        if !config.dedupe_in_flight {
            gateway = gateway.without_dedupe();
        }
        if config.evict_after_put {
            gateway = gateway.with_eviction_after_put(config.max_cache_size);
        }
        gateway
    }

    /// Check the size ceiling after each write instead of leaving it to the caller
    pub fn with_eviction_after_put(mut self, limit: u64) -> Self {
        self.evictor = Some(SizeBoundedEvictor::new(self.store.clone(), limit));
        self
    }

    /// Let concurrent misses for the same identifier each hit the network
    pub fn without_dedupe(mut self) -> Self {
        self.in_flight = None;
        self
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.store
    }

    /// Return the image for `identifier`, from disk if cached
    pub async fn fetch(&self, identifier: &str) -> Result<FetchedImage, FetchError> {
        if let Some(hit) = self.cached(identifier).await {
            return Ok(hit);
        }

        let Some(in_flight) = &self.in_flight else {
            return self.fetch_remote(identifier).await;
        };

        let slot = InFlightSlot::acquire(in_flight, self.store.key_for(identifier));
        let _permit = slot.lock.lock().await;

        match self.cached(identifier).await {
            Some(hit) => Ok(hit),
            None => self.fetch_remote(identifier).await,
        }
    }

    /// Fetch every identifier concurrently. Waits for all of them and
    /// returns the results in input order.
    pub async fn fetch_many<I, S>(&self, identifiers: I) -> Vec<Result<FetchedImage, FetchError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        join_all(
            identifiers
                .into_iter()
                .map(|id| async move { self.fetch(id.as_ref()).await }),
        )
        .await
    }

    async fn cached(&self, identifier: &str) -> Option<FetchedImage> {
        let data = self.store.get(identifier).await?;
        match decode_image(data, true) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(identifier, error = %e, "Cached image is unreadable, refetching");
                None
            }
        }
    }

    async fn fetch_remote(&self, identifier: &str) -> Result<FetchedImage, FetchError> {
        let data = self.source.fetch(identifier).await.map_err(|e| {
            warn!(identifier, error = %e, "Failed to download image");
            e
        })?;

        let image = decode_image(data, false).map_err(|e| {
            warn!(identifier, error = %e, "Downloaded body is not an image");
            e
        })?;

        // Continue even if caching fails
        match self.store.put(identifier, &image.data).await {
            Ok(()) => {
                debug!(identifier, size = image.data.len(), "Cached downloaded image");
                if let Some(evictor) = &self.evictor {
                    evictor.enforce().await;
                }
            }
            Err(e) => warn!(identifier, error = %e, "Failed to cache image"),
        }

        Ok(image)
    }
}

/// Shared per-key lock, dropped from the map once its last holder is gone
struct InFlightSlot<'a> {
    map: &'a InFlightMap,
    key: CacheKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(map: &'a InFlightMap, key: CacheKey) -> Self {
        let lock = map.lock().entry(key.clone()).or_default().clone();
        Self { map, key, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // The map's own reference plus ours means nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.key);
        }
    }
}
