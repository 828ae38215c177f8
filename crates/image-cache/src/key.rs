//! Cache key derivation

use sha2::{Digest, Sha256};
use std::fmt;

/// File name of a cache entry: hex SHA-256 of the identifier plus an extension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `identifier`; `extension` is given without the dot
    pub fn derive(identifier: &str, extension: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        let digest = hex::encode(hasher.finalize());

        if extension.is_empty() {
            Self(digest)
        } else {
            Self(format!("{}.{}", digest, extension))
        }
    }

    /// The 64-character hex digest without the extension
    pub fn digest(&self) -> &str {
        &self.0[..64]
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
