use crate::bitmap::ThumbnailBitmap;
use crate::config::ThumbnailsConfig;
use crate::decoder::{decode_thumbnail, decode_thumbnail_from_memory, DecodeError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

const BUNDLED_PLACEHOLDER: &[u8] = include_bytes!("../assets/thumbnail_broken.png");

#[derive(Debug, Error)]
#[error("failed to load placeholder {path}: {source}")]
pub struct PlaceholderError {
    path: String,
    #[source]
    source: DecodeError,
}

/// The "broken image" bitmap delivered when a thumbnail cannot be decoded.
///
/// Loaded once at startup and handed to the thumbnailer; clones share the
/// same pixels.
#[derive(Debug, Clone)]
pub struct Placeholder(Arc<ThumbnailBitmap>);

impl Placeholder {
    pub fn load(path: &Path, size: u32) -> Result<Self, PlaceholderError> {
        decode_thumbnail(path, size)
            .map(|bitmap| Self(Arc::new(bitmap)))
            .map_err(|source| PlaceholderError {
                path: path.to_string_lossy().into_owned(),
                source,
            })
    }

    /// The copy of the asset compiled into the binary.
    pub fn bundled(size: u32) -> Result<Self, PlaceholderError> {
        decode_thumbnail_from_memory(BUNDLED_PLACEHOLDER, size)
            .map(|bitmap| Self(Arc::new(bitmap)))
            .map_err(|source| PlaceholderError {
                path: "<bundled>".into(),
                source,
            })
    }

    /// Loads the configured asset, or the bundled one when it is unset or missing.
    pub fn from_config(config: &ThumbnailsConfig) -> Result<Self, PlaceholderError> {
        match config.placeholder_path.as_deref().map(Path::new) {
            Some(path) if path.is_file() => Self::load(path, config.size),
            Some(path) => {
                warn!(path = %path.display(), "placeholder asset not found, using bundled copy");
                Self::bundled(config.size)
            }
            None => Self::bundled(config.size),
        }
    }

    pub fn bitmap(&self) -> Arc<ThumbnailBitmap> {
        Arc::clone(&self.0)
    }

    /// True when `bitmap` is this placeholder rather than a decoded preview.
    pub fn is(&self, bitmap: &Arc<ThumbnailBitmap>) -> bool {
        Arc::ptr_eq(&self.0, bitmap)
    }
}
