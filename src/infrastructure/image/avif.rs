//! AVIF decoding for still images and AV1 image sequences.
//!
//! Stills go through the `image` crate. Files carrying an image sequence
//! track are split into their coded samples, and each sample is decoded with
//! a single `dav1d` decoder. Frame delays come from the composition duration
//! of each sample in the track timescale.

use std::io::Cursor;

use dav1d::pixel::{MatrixCoefficients, YUVRange};
use dav1d::{PixelLayout, PlanarImageComponent};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use mp4parse::unstable::create_sample_table;
use mp4parse::{AvifContext, ParseStrictness, TrackType, read_avif};
use tracing::{debug, trace};

use crate::domain::errors::BoxError;

use super::codec::RasterFrame;

/// Upper bound on `get_picture` retries for one sample.
const MAX_PICTURE_POLLS: usize = 64;

/// One coded AV1 temporal unit of an image sequence.
#[derive(Debug, Clone, Copy)]
pub struct Av1Sample<'a> {
    /// Coded OBUs of the sample.
    pub data: &'a [u8],
    /// Display duration in milliseconds.
    pub delay_ms: u32,
}

/// Decodes an AVIF file. Sequences yield one frame per sample, stills yield
/// a single frame with no delay.
///
/// # Errors
/// Returns the container or codec error when the bytes cannot be decoded.
pub fn decode(bytes: &[u8]) -> Result<Vec<RasterFrame>, BoxError> {
    let context = read_avif(&mut Cursor::new(bytes), ParseStrictness::Normal)?;

    match sequence_samples(&context, bytes)? {
        Some(samples) if !samples.is_empty() => {
            debug!(frames = samples.len(), "Decoding AVIF image sequence");
            decode_samples(&samples)
        }
        _ => {
            let image = image::load_from_memory_with_format(bytes, ImageFormat::Avif)?;
            Ok(vec![RasterFrame { image, delay_ms: 0 }])
        }
    }
}

/// Collects the samples of the first picture track, if the file has one.
fn sequence_samples<'a>(
    context: &AvifContext,
    bytes: &'a [u8],
) -> Result<Option<Vec<Av1Sample<'a>>>, BoxError> {
    let Some(sequence) = &context.sequence else {
        return Ok(None);
    };
    let Some(track) = sequence
        .tracks
        .iter()
        .find(|t| matches!(t.track_type, TrackType::Picture | TrackType::Video))
    else {
        return Ok(None);
    };

    let timescale = track
        .timescale
        .as_ref()
        .map(|t| t.0)
        .or_else(|| sequence.timescale.as_ref().map(|t| t.0))
        .filter(|&t| t > 0)
        .ok_or("image sequence has no timescale")?;

    let table = create_sample_table(track, 0.into()).ok_or("image sequence has no sample table")?;

    let samples = table
        .iter()
        .map(|indice| -> Result<Av1Sample<'a>, BoxError> {
            let start = usize::try_from(indice.start_offset.0)?;
            let end = usize::try_from(indice.end_offset.0)?;
            let data = bytes
                .get(start..end)
                .ok_or("image sequence sample lies outside the file")?;
            let ticks = indice
                .end_composition
                .0
                .saturating_sub(indice.start_composition.0);
            Ok(Av1Sample {
                data,
                delay_ms: ticks_to_ms(ticks, timescale),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    trace!(samples = samples.len(), timescale, "Read AVIF sample table");
    Ok(Some(samples))
}

/// Converts a duration in timescale ticks to whole milliseconds.
pub(crate) fn ticks_to_ms(ticks: i64, timescale: u64) -> u32 {
    let ticks = u64::try_from(ticks).unwrap_or(0);
    let ms = ticks.saturating_mul(1000) / timescale.max(1);
    u32::try_from(ms).unwrap_or(u32::MAX)
}

/// Decodes coded AV1 samples in order with one decoder.
///
/// # Errors
/// Returns the codec error of the first sample that fails.
pub fn decode_samples(samples: &[Av1Sample<'_>]) -> Result<Vec<RasterFrame>, BoxError> {
    let mut settings = dav1d::Settings::new();
    settings.set_max_frame_delay(1);
    let mut decoder = dav1d::Decoder::with_settings(&settings)?;

    samples
        .iter()
        .map(|sample| -> Result<RasterFrame, BoxError> {
            match decoder.send_data(sample.data.to_vec(), None, None, None) {
                Ok(()) | Err(dav1d::Error::Again) => {}
                Err(e) => return Err(e.into()),
            }
            let picture = next_picture(&mut decoder)?;
            Ok(RasterFrame {
                image: DynamicImage::ImageRgba8(picture_to_rgba(&picture)?),
                delay_ms: sample.delay_ms,
            })
        })
        .collect()
}

fn next_picture(decoder: &mut dav1d::Decoder) -> Result<dav1d::Picture, BoxError> {
    for _ in 0..MAX_PICTURE_POLLS {
        match decoder.get_picture() {
            Err(dav1d::Error::Again) => match decoder.send_pending_data() {
                Ok(()) | Err(dav1d::Error::Again) => {}
                Err(e) => return Err(e.into()),
            },
            picture => return Ok(picture?),
        }
    }
    Err("AV1 sample produced no picture".into())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum YuvMatrix {
    KrKb { kr: f32, kb: f32 },
    Identity,
}

impl YuvMatrix {
    fn from_coefficients(coefficients: MatrixCoefficients) -> Result<Self, BoxError> {
        let (kr, kb) = match coefficients {
            MatrixCoefficients::Identity => return Ok(Self::Identity),
            MatrixCoefficients::BT709 | MatrixCoefficients::Unspecified => (0.2126, 0.0722),
            MatrixCoefficients::BT470M => (0.30, 0.11),
            MatrixCoefficients::BT470BG | MatrixCoefficients::ST170M => (0.299, 0.114),
            MatrixCoefficients::ST240M => (0.212, 0.087),
            MatrixCoefficients::BT2020NonConstantLuminance => (0.2627, 0.0593),
            _ => return Err("unsupported AVIF matrix coefficients".into()),
        };
        Ok(Self::KrKb { kr, kb })
    }

    /// Maps 8-bit scaled samples to RGB in `0.0..=1.0`.
    fn to_rgb(self, y: f32, cb: f32, cr: f32, full_range: bool) -> [f32; 3] {
        let luma = |v: f32| {
            if full_range {
                v / 255.0
            } else {
                (v - 16.0) / 219.0
            }
        };
        let chroma = |v: f32| {
            if full_range {
                (v - 128.0) / 255.0
            } else {
                (v - 128.0) / 224.0
            }
        };

        match self {
            Self::Identity => [luma(cr), luma(y), luma(cb)],
            Self::KrKb { kr, kb } => {
                let (y, cb, cr) = (luma(y), chroma(cb), chroma(cr));
                let r = y + 2.0 * (1.0 - kr) * cr;
                let b = y + 2.0 * (1.0 - kb) * cb;
                let g = (y - kr * r - kb * b) / (1.0 - kr - kb);
                [r, g, b]
            }
        }
    }
}

struct PlaneReader {
    plane: dav1d::Plane,
    stride: usize,
    /// Divisor bringing samples down to 8-bit scale, `None` for 8-bit planes.
    wide_scale: Option<f32>,
}

impl PlaneReader {
    fn new(picture: &dav1d::Picture, component: PlanarImageComponent, depth: usize) -> Self {
        let stride = picture.stride(component) as usize;
        Self {
            plane: picture.plane(component),
            stride,
            wide_scale: (depth > 8).then(|| if depth == 10 { 4.0 } else { 16.0 }),
        }
    }

    fn sample(&self, x: usize, y: usize) -> f32 {
        let data: &[u8] = self.plane.as_ref();
        match self.wide_scale {
            None => data.get(y * self.stride + x).map_or(0.0, |&v| f32::from(v)),
            Some(scale) => {
                let at = y * self.stride + x * 2;
                data.get(at..at + 2)
                    .map_or(0.0, |b| f32::from(u16::from_ne_bytes([b[0], b[1]])) / scale)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Converts a decoded AV1 picture to opaque 8-bit RGBA.
fn picture_to_rgba(picture: &dav1d::Picture) -> Result<RgbaImage, BoxError> {
    let depth = picture.bit_depth();
    if !matches!(depth, 8 | 10 | 12) {
        return Err(format!("unsupported AV1 bit depth {depth}").into());
    }

    let layout = picture.pixel_layout();
    let matrix = YuvMatrix::from_coefficients(picture.matrix_coefficients())?;
    if matrix == YuvMatrix::Identity && layout != PixelLayout::I444 {
        return Err("identity matrix requires 4:4:4 chroma".into());
    }

    let (shift_x, shift_y) = match layout {
        PixelLayout::I400 | PixelLayout::I444 => (0, 0),
        PixelLayout::I420 => (1, 1),
        PixelLayout::I422 => (1, 0),
    };
    let full_range = matches!(picture.color_range(), YUVRange::Full);

    let luma = PlaneReader::new(picture, PlanarImageComponent::Y, depth);
    let chroma = (layout != PixelLayout::I400).then(|| {
        (
            PlaneReader::new(picture, PlanarImageComponent::U, depth),
            PlaneReader::new(picture, PlanarImageComponent::V, depth),
        )
    });

    let mut out = RgbaImage::new(picture.width(), picture.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let (cb, cr) = chroma.as_ref().map_or((128.0, 128.0), |(u, v)| {
            let (cx, cy) = (x >> shift_x, y >> shift_y);
            (u.sample(cx, cy), v.sample(cx, cy))
        });
        let [r, g, b] = matrix.to_rgb(luma.sample(x, y), cb, cr, full_range);
        *pixel = Rgba([to_channel(r), to_channel(g), to_channel(b), 255]);
    }

    Ok(out)
}
