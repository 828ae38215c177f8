//! Error types for the image cache

use std::fmt;

/// Failure of a store operation (directory creation, write, clear).
///
/// Always non-fatal: the cache is an optimization, so callers log these and
/// carry on without a cached copy.
#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "Cache IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failure of a gateway fetch, surfaced to the caller as a typed result
#[derive(Debug)]
pub enum FetchError {
    /// Transport-level failure, including non-success HTTP statuses
    Network(Box<dyn std::error::Error + Send + Sync>),
    /// The response body could not be decoded as an image
    InvalidData(String),
}

impl FetchError {
    pub fn network(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        FetchError::Network(msg.into())
    }

    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }

    pub fn is_invalid_data(&self) -> bool {
        matches!(self, FetchError::InvalidData(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(err) => write!(f, "Network error: {}", err),
            FetchError::InvalidData(msg) => write!(f, "Invalid image data: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Network(err) => Some(err.as_ref()),
            FetchError::InvalidData(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(Box::new(err))
    }
}

impl From<image::ImageError> for FetchError {
    fn from(err: image::ImageError) -> Self {
        FetchError::InvalidData(err.to_string())
    }
}
