//! Conversion of decoded raster frames into raw RGBA payloads.

use image::{DynamicImage, Rgba, RgbaImage};

use super::geometry::{CellSize, scale_to_cell};

/// One frame ready to be compressed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Transmitted width in pixels, including right padding.
    pub width: u32,
    /// Transmitted height in pixels.
    pub height: u32,
    /// Row-major RGBA bytes, 4 per pixel.
    pub payload: Vec<u8>,
    /// Columns this frame spans once scaled to one cell row.
    pub column_span: u32,
}

/// Turns raster frames into the flat RGBA layout the graphics protocol
/// expects for `f=32` transmission.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    cell: CellSize,
    right_padding: u32,
}

impl FrameEncoder {
    /// Creates an encoder for the given cell geometry.
    #[must_use]
    pub const fn new(cell: CellSize, right_padding: u32) -> Self {
        Self {
            cell,
            right_padding,
        }
    }

    /// Encodes a frame, applying right padding and computing its column span.
    #[must_use]
    pub fn encode(&self, frame: &DynamicImage) -> EncodedFrame {
        let mut rgba = to_rgba8_shifted(frame);
        if self.right_padding > 0 {
            rgba = pad_right(&rgba, self.right_padding);
        }

        let (width, height) = rgba.dimensions();
        let scaled = scale_to_cell(width, height, self.cell);

        EncodedFrame {
            width,
            height,
            payload: rgba.into_raw(),
            column_span: scaled.column_span,
        }
    }
}

/// Converts any decoded frame to 8-bit RGBA. Channels stored with 16 bits are
/// reduced by dropping the low byte.
#[allow(clippy::cast_possible_truncation)]
fn to_rgba8_shifted(frame: &DynamicImage) -> RgbaImage {
    match frame {
        DynamicImage::ImageRgba8(buf) => buf.clone(),
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => {
            let wide = frame.to_rgba16();
            RgbaImage::from_fn(wide.width(), wide.height(), |x, y| {
                let px = wide.get_pixel(x, y);
                Rgba(px.0.map(|c| (c >> 8) as u8))
            })
        }
        other => other.to_rgba8(),
    }
}

fn pad_right(src: &RgbaImage, padding: u32) -> RgbaImage {
    let mut padded = RgbaImage::new(src.width() + padding, src.height());
    image::imageops::replace(&mut padded, src, 0, 0);
    padded
}
