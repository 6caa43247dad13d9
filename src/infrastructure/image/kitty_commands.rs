//! Kitty graphics protocol command generation.
//!
//! Images are transmitted by file reference (`t=f`) pointing at zlib
//! compressed (`o=z`) 32-bit RGBA payloads and shown through virtual
//! placements (`U=1`) that the terminal substitutes for Unicode placeholder
//! cells. The placement id is carried in the placeholder's foreground color.
//!
//! Reference: <https://sw.kovidgoyal.net/kitty/graphics-protocol/>

use std::fmt::Write;

use crate::domain::entities::{DecodedImageFrame, PlacedImage, PlacementId};

/// Private-use code point kitty renders as an image cell.
pub const PLACEHOLDER: char = '\u{10EEEE}';

const APC: &str = "\x1b_G";
const ST: &str = "\x1b\\";

/// Splits a placement id into the 8-bit RGB channels of its placeholder color.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn id_to_rgb(id: PlacementId) -> (u8, u8, u8) {
    ((id >> 16) as u8, (id >> 8) as u8, id as u8)
}

fn write_transmit(out: &mut String, id: PlacementId, frame: &DecodedImageFrame) {
    let _ = write!(
        out,
        "{APC}f=32,i={id},t=f,q=2,s={},v={},o=z;{}{ST}",
        frame.width_px, frame.height_px, frame.payload_ref
    );
}

fn write_placement(out: &mut String, id: PlacementId, column_span: u32) {
    let _ = write!(out, "{APC}a=p,i={id},p={id},q=2,U=1,r=1,c={column_span}{ST}");
}

/// Builds the commands that transmit the image and create its virtual
/// placement. Animated images additionally get one frame command per extra
/// frame and an infinite-loop play command.
#[must_use]
pub fn setup_command(placed: &PlacedImage) -> String {
    let id = placed.placement_id;
    let frames = &placed.image.frames;
    let mut out = String::new();

    let Some((first, rest)) = frames.split_first() else {
        return out;
    };

    write_transmit(&mut out, id, first);

    if !rest.is_empty() {
        let _ = write!(out, "{APC}a=a,i={id},r=1,z={},q=2;{ST}", first.delay_ms);

        for frame in rest {
            let _ = write!(
                out,
                "{APC}a=f,i={id},t=t,f=32,s={},v={},z={},q=2,o=z;{}{ST}",
                frame.width_px, frame.height_px, frame.delay_ms, frame.payload_ref
            );
        }

        let _ = write!(out, "{APC}a=a,i={id},s=3,v=1,q=2;{ST}");
    }

    write_placement(&mut out, id, placed.image.column_span);
    out
}

/// Builds the placeholder text: `column_span` placeholder cells colored with
/// the placement id.
#[must_use]
pub fn placeholder_text(id: PlacementId, column_span: u32) -> String {
    let (r, g, b) = id_to_rgb(id);
    let cells: String = std::iter::repeat_n(PLACEHOLDER, column_span as usize).collect();
    format!("\x1b[38;2;{r};{g};{b}m{cells}\x1b[39m")
}

/// Deletes one image and its placements.
#[must_use]
pub fn delete_command(id: PlacementId) -> String {
    format!("{APC}a=D,i={id},q=2{ST}")
}

/// Deletes every placement on screen.
#[must_use]
pub fn delete_all_command() -> String {
    format!("{APC}a=D{ST}")
}
