//! Decoding photo files into RGB frames.

use std::path::Path;
use thiserror::Error;

/// File extensions accepted as photos (lowercase).
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("unsupported photo type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A decoded RGB photo, 3 bytes per pixel, row-major.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, PhotoError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(PhotoError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Decode a photo from disk. The extension must be one of [`SUPPORTED_EXTENSIONS`].
    pub fn load(path: &Path) -> Result<Self, PhotoError> {
        if !is_supported_photo(path) {
            return Err(PhotoError::Unsupported(path.display().to_string()));
        }
        let img = image::open(path).map_err(|source| PhotoError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_rgb(img.to_rgb8()))
    }

    pub fn from_rgb(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }
}

/// True if the path has a photo extension we can decode (case-insensitive).
pub fn is_supported_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}
