//! Codec selection and multi-format decoding.
//!
//! Decoding picks one of four paths from the declared content type and the
//! caller's animated flag:
//! - `image/avif` always goes through the AVIF decoder (still or sequence)
//! - animated `image/webp` and `image/gif` go through their animation decoders
//! - any other animated type is rejected
//! - everything else is a single-frame decode with format sniffing

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, Delay, DynamicImage, Frame, ImageReader};
use tracing::{debug, trace};

use crate::domain::errors::{DisplayError, DisplayResult};

use super::frame_encoder::{EncodedFrame, FrameEncoder};

/// A decoded raster frame and how long it stays on screen.
#[derive(Debug, Clone)]
pub struct RasterFrame {
    /// Decoded pixels.
    pub image: DynamicImage,
    /// Display duration in milliseconds, `0` for still images.
    pub delay_ms: u32,
}

/// A frame after RGBA encoding, still held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedFrame {
    /// Encoded pixels and geometry.
    pub frame: EncodedFrame,
    /// Display duration in milliseconds.
    pub delay_ms: u32,
}

/// A whole image after decoding and encoding, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Column span of frame 0, shared by all frames.
    pub column_span: u32,
    /// Frames in display order, never empty.
    pub frames: Vec<TimedFrame>,
}

/// Formats with a dedicated animation decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedFormat {
    /// AVIF, still or image sequence.
    Avif,
    /// Animated WebP.
    WebP,
    /// Animated GIF.
    Gif,
}

impl AnimatedFormat {
    /// Short format name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Decodes every frame of the image.
    ///
    /// # Errors
    /// Returns `DecodeFailure` if the bytes are not a valid image of this format.
    pub fn decode_frames(self, bytes: &[u8]) -> DisplayResult<Vec<RasterFrame>> {
        let fail = |e: image::ImageError| DisplayError::decode(self.name(), e);

        let frames = match self {
            Self::Avif => decode_avif(bytes)?,
            Self::WebP => {
                let decoder = WebPDecoder::new(Cursor::new(bytes)).map_err(fail)?;
                if decoder.has_animation() {
                    let frames = decoder.into_frames().collect_frames().map_err(fail)?;
                    frames.into_iter().map(into_raster).collect()
                } else {
                    let image = DynamicImage::from_decoder(decoder).map_err(fail)?;
                    vec![RasterFrame { image, delay_ms: 0 }]
                }
            }
            Self::Gif => {
                let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(fail)?;
                let frames = decoder.into_frames().collect_frames().map_err(fail)?;
                frames.into_iter().map(into_raster).collect()
            }
        };

        if frames.is_empty() {
            return Err(DisplayError::decode(self.name(), "image contains no frames"));
        }
        Ok(frames)
    }
}

#[cfg(feature = "avif")]
fn decode_avif(bytes: &[u8]) -> DisplayResult<Vec<RasterFrame>> {
    super::avif::decode(bytes).map_err(|e| DisplayError::decode(AnimatedFormat::Avif.name(), e))
}

#[cfg(not(feature = "avif"))]
fn decode_avif(_bytes: &[u8]) -> DisplayResult<Vec<RasterFrame>> {
    Err(DisplayError::decode(
        AnimatedFormat::Avif.name(),
        "built without AVIF support",
    ))
}

fn into_raster(frame: Frame) -> RasterFrame {
    let delay_ms = delay_to_ms(frame.delay());
    RasterFrame {
        image: DynamicImage::ImageRgba8(frame.into_buffer()),
        delay_ms,
    }
}

fn delay_to_ms(delay: Delay) -> u32 {
    let (numer, denom) = delay.numer_denom_ms();
    if denom == 0 { 0 } else { numer / denom }
}

/// Decoding strategy chosen for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Single frame, format detected from magic bytes.
    Static,
    /// Multi-frame decode of a known format.
    Animated(AnimatedFormat),
}

impl Codec {
    /// Picks the decoder for a declared content type.
    ///
    /// # Errors
    /// Returns `UnsupportedAnimatedFormat` when `is_animated` is set and the
    /// content type has no animation decoder.
    pub fn select(content_type: &str, is_animated: bool) -> DisplayResult<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "image/avif" => Ok(Self::Animated(AnimatedFormat::Avif)),
            "image/webp" if is_animated => Ok(Self::Animated(AnimatedFormat::WebP)),
            "image/gif" if is_animated => Ok(Self::Animated(AnimatedFormat::Gif)),
            _ if is_animated => Err(DisplayError::unsupported_animated(content_type)),
            _ => Ok(Self::Static),
        }
    }

    /// Decodes the bytes into raster frames.
    ///
    /// # Errors
    /// Returns `DecodeFailure` for corrupt or unrecognised data.
    pub fn decode_frames(self, bytes: &[u8]) -> DisplayResult<Vec<RasterFrame>> {
        match self {
            Self::Animated(format) => format.decode_frames(bytes),
            Self::Static => {
                let image = decode_static(bytes)?;
                Ok(vec![RasterFrame { image, delay_ms: 0 }])
            }
        }
    }
}

fn decode_static(bytes: &[u8]) -> DisplayResult<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DisplayError::decode("unknown", e))?;

    let format = reader
        .format()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("unknown");

    reader
        .decode()
        .map_err(|e| DisplayError::decode(format, e))
}

/// Decodes `bytes` with the codec chosen for `content_type` and encodes every
/// frame. The column span is taken from frame 0.
///
/// # Errors
/// Returns `UnsupportedAnimatedFormat` or `DecodeFailure`.
pub fn decode_image(
    bytes: &[u8],
    content_type: &str,
    is_animated: bool,
    encoder: &FrameEncoder,
) -> DisplayResult<EncodedImage> {
    let codec = Codec::select(content_type, is_animated)?;
    trace!(?codec, content_type, "Selected codec");

    let frames: Vec<TimedFrame> = codec
        .decode_frames(bytes)?
        .iter()
        .map(|r| TimedFrame {
            frame: encoder.encode(&r.image),
            delay_ms: r.delay_ms,
        })
        .collect();

    let column_span = frames
        .first()
        .map(|f| f.frame.column_span)
        .ok_or_else(|| DisplayError::decode(content_type, "image contains no frames"))?;
    debug!(
        content_type,
        frames = frames.len(),
        column_span,
        "Decoded image"
    );

    Ok(EncodedImage {
        column_span,
        frames,
    })
}
