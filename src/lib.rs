//! Preview thumbnails for the rows of a batch image optimizer.
//!
//! [`Thumbnailer`] decodes images on a small worker pool, reusing
//! freedesktop.org cached thumbnails when they exist, and hands every
//! finished [`ThumbnailBitmap`] to the callback registered with the request.

pub mod bitmap;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod fields;
pub mod placeholder;
pub mod thumbnailer;

pub use bitmap::ThumbnailBitmap;
pub use cache::{find_cached_thumbnail, CacheLayout, CacheTier, FreedesktopLayout, NoCache};
pub use config::{Config, ThumbnailsConfig};
pub use decoder::{decode_thumbnail, DecodeError};
pub use fields::{Field, FieldKind, DISPLAYED_FIELDS};
pub use placeholder::Placeholder;
pub use thumbnailer::{Callback, Thumbnailer, ThumbnailerError};
