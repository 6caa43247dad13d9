//! Scaling of frames to the terminal cell grid.

/// Pixel size of one terminal cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    /// Cell width in pixels.
    pub width: f32,
    /// Cell height in pixels.
    pub height: f32,
}

impl CellSize {
    /// Creates a cell size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// A frame scaled to one text row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledGeometry {
    /// Width in pixels after scaling the height to one cell.
    pub width_px: u32,
    /// Text columns covered by the scaled width.
    pub column_span: u32,
}

/// Scales a frame so its height fills exactly one cell row and returns the
/// resulting width and column span.
///
/// A zero frame height has no meaningful span and yields zero columns.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scale_to_cell(frame_width: u32, frame_height: u32, cell: CellSize) -> ScaledGeometry {
    if frame_height == 0 || cell.width <= 0.0 {
        return ScaledGeometry {
            width_px: 0,
            column_span: 0,
        };
    }

    let ratio = cell.height / frame_height as f32;
    let width = (frame_width as f32 * ratio).round();
    let columns = (width / cell.width).ceil();

    ScaledGeometry {
        width_px: width as u32,
        column_span: columns as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(28, 28, 10.0, 20.0, 20, 2 ; "square emote")]
    #[test_case(112, 28, 10.0, 20.0, 80, 8 ; "wide emote")]
    #[test_case(18, 18, 9.0, 18.0, 18, 2 ; "badge")]
    #[test_case(20, 20, 10.0, 10.0, 10, 1 ; "exact fit")]
    #[test_case(21, 20, 10.0, 10.0, 11, 2 ; "rounds then ceils")]
    #[test_case(10, 0, 10.0, 10.0, 0, 0 ; "zero height")]
    fn test_scale_to_cell(w: u32, h: u32, cw: f32, ch: f32, width: u32, cols: u32) {
        let scaled = scale_to_cell(w, h, CellSize::new(cw, ch));
        assert_eq!(scaled.width_px, width);
        assert_eq!(scaled.column_span, cols);
    }
}
