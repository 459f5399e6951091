use image::RgbaImage;

/// Bytes per RGBA8 pixel.
pub const CHANNELS: usize = 4;

/// Immutable 8-bit RGBA preview, rows packed with `row_stride == width * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailBitmap {
    width: u32,
    height: u32,
    row_stride: usize,
    pixels: Vec<u8>,
}

impl ThumbnailBitmap {
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            row_stride: width as usize * CHANNELS,
            pixels: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.row_stride + x as usize * CHANNELS;
        let px = &self.pixels[offset..offset + CHANNELS];
        Some([px[0], px[1], px[2], px[3]])
    }
}
