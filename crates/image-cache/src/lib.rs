//! Disk-backed image cache
//!
//! Stores downloaded images in a single directory keyed by a SHA-256 digest
//! of their URL, purges the whole directory when it grows past a size
//! ceiling or when the host runs low on memory, and serves fetches from disk
//! before falling back to the network.
//!
//! There are no global instances: build one [`DiskStore`] per application
//! and share it (behind an `Arc`) with the [`ImageGateway`],
//! [`SizeBoundedEvictor`] and [`PressureMonitor`] that need it.

mod decode;
mod error;
mod eviction;
mod gateway;
mod key;
mod monitor;
mod source;
mod store;
mod types;

pub use decode::{decode_image, FetchedImage};
pub use error::{CacheError, FetchError, Result};
pub use eviction::{EvictionOutcome, SizeBoundedEvictor};
pub use gateway::ImageGateway;
pub use key::CacheKey;
pub use monitor::{MemoryProbe, PressureEvent, PressureMonitor, SystemMemoryProbe};
pub use source::{HttpImageSource, ImageSource};
pub use store::DiskStore;
pub use types::{
    CacheConfig, CacheStats, ClearReport, MemoryInfo, DEFAULT_FILE_EXTENSION,
    DEFAULT_MAX_CACHE_SIZE, DEFAULT_PRESSURE_POLL_SECS, DEFAULT_PRESSURE_THRESHOLD,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};

pub use image::{DynamicImage, ImageFormat};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::FetchError;
    use crate::source::ImageSource;
    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Encode a solid-colour PNG of the given size
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 90]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// In-memory source with per-URL bodies, failures and delays
    #[derive(Default)]
    pub struct FakeSource {
        bodies: HashMap<String, Result<Vec<u8>, String>>,
        delays: HashMap<String, Duration>,
        calls: AtomicUsize,
        completed: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
            self.bodies.insert(url.to_string(), Ok(body));
            self
        }

        pub fn with_failure(mut self, url: &str, msg: &str) -> Self {
            self.bodies.insert(url.to_string(), Err(msg.to_string()));
            self
        }

        pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn completion_order(&self) -> Vec<String> {
            self.completed.lock().clone()
        }
    }

    #[async_trait]
    impl ImageSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            self.completed.lock().push(url.to_string());

            match self.bodies.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(msg)) => Err(FetchError::network(msg.clone())),
                None => Err(FetchError::network("server returned status 404 Not Found")),
            }
        }
    }
}
