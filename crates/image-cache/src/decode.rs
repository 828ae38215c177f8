//! Image decoding

use crate::error::FetchError;
use image::{DynamicImage, ImageFormat};

/// A decoded image together with the bytes it was decoded from
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
    /// Raw encoded bytes, exactly as stored on disk
    pub data: Vec<u8>,
    /// Whether the bytes came from the disk cache
    pub from_cache: bool,
}

impl FetchedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Sniff the format from the leading bytes and decode
pub fn decode_image(data: Vec<u8>, from_cache: bool) -> Result<FetchedImage, FetchError> {
    if data.is_empty() {
        return Err(FetchError::InvalidData("empty body".to_string()));
    }

    let format = image::guess_format(&data)?;
    let image = image::load_from_memory_with_format(&data, format)?;

    Ok(FetchedImage {
        image,
        format,
        data,
        from_cache,
    })
}
