use crate::bitmap::ThumbnailBitmap;
use fast_image_resize::images::Image;
use fast_image_resize::{
    FilterType, ImageBufferError, PixelType, ResizeAlg, ResizeError, ResizeOptions, Resizer,
};
use image::imageops;
use image::{ImageFormat, RgbaImage};
use rexif::{parse_buffer_quiet, ExifData, ExifTag, TagValue};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("resize failed: {0}")]
    Resize(#[from] ResizeError),
    #[error("invalid pixel buffer: {0}")]
    Buffer(#[from] ImageBufferError),
}

/// Decodes `path` into an RGBA preview that fits in a `target_size` square.
///
/// The image is box-filtered down (never up) keeping its aspect ratio, then
/// the EXIF orientation of a JPEG, when present, is applied to the small
/// result.
///
/// # Panics
///
/// Panics if `target_size` is zero.
pub fn decode_thumbnail(path: &Path, target_size: u32) -> Result<ThumbnailBitmap, DecodeError> {
    assert!(target_size > 0, "thumbnail target size must be positive");
    let bytes = fs::read(path)?;
    decode_thumbnail_from_memory(&bytes, target_size)
}

pub fn decode_thumbnail_from_memory(
    bytes: &[u8],
    target_size: u32,
) -> Result<ThumbnailBitmap, DecodeError> {
    assert!(target_size > 0, "thumbnail target size must be positive");
    let rgba = image::load_from_memory(bytes)?.into_rgba8();

    let (width, height) = rgba.dimensions();
    let (fit_width, fit_height) = fit_within(width, height, target_size);
    let resized = if (fit_width, fit_height) == (width, height) {
        rgba
    } else {
        box_resize(rgba, fit_width, fit_height)?
    };

    Ok(ThumbnailBitmap::from_rgba(apply_orientation(
        resized,
        orientation(bytes),
    )))
}

/// Orientation tag of a JPEG; other formats are shown as stored.
fn orientation(bytes: &[u8]) -> u16 {
    if !matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg)) {
        return 1;
    }
    parse_buffer_quiet(bytes)
        .0
        .ok()
        .as_ref()
        .and_then(exif_orientation)
        .unwrap_or(1)
}

/// Largest size with the same aspect ratio fitting in `size x size`.
pub(crate) fn fit_within(width: u32, height: u32, size: u32) -> (u32, u32) {
    if width <= size && height <= size {
        return (width.max(1), height.max(1));
    }
    let scaled = |long: u32, short: u32| -> u32 {
        ((short as f64 * size as f64 / long as f64).round() as u32).clamp(1, size)
    };
    if width >= height {
        (size, scaled(width, height))
    } else {
        (scaled(height, width), size)
    }
}

/// Box-filtered (area-averaging) downscale of an RGBA buffer.
fn box_resize(
    src: RgbaImage,
    dst_width: u32,
    dst_height: u32,
) -> Result<RgbaImage, DecodeError> {
    let (src_width, src_height) = src.dimensions();
    let src_image = Image::from_vec_u8(src_width, src_height, src.into_raw(), PixelType::U8x4)?;
    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);

    let mut resizer = Resizer::new();
    resizer.resize(
        &src_image,
        &mut dst_image,
        &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Box)),
    )?;

    RgbaImage::from_raw(dst_width, dst_height, dst_image.into_vec())
        .ok_or(DecodeError::Buffer(ImageBufferError::InvalidBufferSize))
}

fn apply_orientation(image: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&image),
        3 => imageops::rotate180(&image),
        4 => imageops::flip_vertical(&image),
        5 => imageops::rotate270(&imageops::flip_horizontal(&image)),
        6 => imageops::rotate90(&image),
        7 => imageops::rotate90(&imageops::flip_horizontal(&image)),
        8 => imageops::rotate270(&image),
        _ => image,
    }
}

fn exif_orientation(exif: &ExifData) -> Option<u16> {
    exif.entries
        .iter()
        .find(|entry| entry.tag == ExifTag::Orientation)
        .and_then(|entry| tag_value_to_u16(&entry.value))
        .filter(|value| (1..=8).contains(value))
}

fn tag_value_to_u16(value: &TagValue) -> Option<u16> {
    match value {
        TagValue::U16(values) => values.first().copied(),
        TagValue::U8(values) => values.first().copied().map(u16::from),
        TagValue::U32(values) => values.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::I16(values) => values.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::I32(values) => values.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::I8(values) => values.first().and_then(|v| u16::try_from(*v).ok()),
        _ => None,
    }
}
